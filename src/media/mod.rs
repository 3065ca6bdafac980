//! Media frames, FLV helpers and the GOP cache

pub mod flv;
pub mod frame;
pub mod gop;

pub use frame::{FrameKind, MediaFrame};
pub use gop::GopCache;
