//! camrelay: RTMP ingest server with HTTP-FLV playback
//!
//! Accepts an RTMP push (OBS, ffmpeg, an IP camera) and makes the stream
//! available to RTMP players and HTTP-FLV viewers, with a GOP cache so
//! late joiners start rendering at the last keyframe.
//!
//! ```no_run
//! use std::sync::Arc;
//! use camrelay::{ControlServer, RtmpServer, ServerConfig, StreamRegistry};
//!
//! #[tokio::main]
//! async fn main() -> camrelay::Result<()> {
//!     let config = ServerConfig::default();
//!     let registry = Arc::new(StreamRegistry::with_config(config.registry_config()));
//!
//!     let rtmp = RtmpServer::new(config.clone(), Arc::clone(&registry));
//!     let http = ControlServer::new(config, registry);
//!
//!     tokio::try_join!(rtmp.run(), http.run())?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod control;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use control::ControlServer;
pub use error::{Error, Result};
pub use registry::{StreamKey, StreamRegistry};
pub use server::{RtmpServer, ServerConfig};
