//! HTTP control plane

pub mod server;

pub use server::ControlServer;
