//! Stream registry: key → GOP cache + subscriber queues
//!
//! One `StreamRegistry` is shared by all RTMP sessions and HTTP viewers
//! through an `Arc` handed in at construction. Publishers claim keys and
//! push frames; subscribers get a bounded queue plus catch-up frames.
//! Fan-out never blocks on a slow subscriber: a full queue drops that
//! subscriber and nobody else notices.

pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{StreamEvent, Subscription};
pub use error::RegistryError;
pub use key::StreamKey;
pub use store::{StreamInfo, StreamRegistry};
