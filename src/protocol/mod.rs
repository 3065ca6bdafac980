//! RTMP wire protocol: handshake, chunk stream, typed messages

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDemuxer, ChunkMuxer, RawMessage};
pub use handshake::ServerHandshake;
pub use message::{Command, Message, UserControlEvent};
