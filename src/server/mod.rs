//! RTMP ingest server

pub mod config;
pub mod connection;
pub mod listener;
pub mod netinfo;

pub use config::ServerConfig;
pub use connection::Connection;
pub use listener::RtmpServer;
