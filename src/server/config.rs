//! Server configuration

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::media::gop;
use crate::protocol::constants::{DEFAULT_WINDOW_ACK_SIZE, MAX_CHUNK_SIZE};
use crate::registry::RegistryConfig;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// RTMP listener address
    pub rtmp_addr: SocketAddr,

    /// HTTP control/view listener address
    pub http_addr: SocketAddr,

    /// Address to print in publish/view URLs. When unset, the routable
    /// local address is discovered via a UDP route probe.
    pub advertised_addr: Option<IpAddr>,

    /// Chunk size to negotiate with clients
    pub chunk_size: u32,

    /// Window acknowledgement size
    pub window_ack_size: u32,

    /// Maximum concurrent RTMP connections (0 = unlimited)
    pub max_connections: usize,

    /// Handshake must complete within this time
    pub connection_timeout: Duration,

    /// Interval between server-initiated pings to idle publishers
    pub ping_interval: Duration,

    /// Disconnect if nothing is received for this long
    pub ping_timeout: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Application-level read buffer size
    pub read_buffer_size: usize,

    /// Cache the current GOP for late joiners
    pub gop_cache: bool,

    /// Per-stream byte cap on the GOP cache
    pub gop_max_bytes: usize,

    /// Per-stream frame count cap on the GOP cache
    pub gop_max_frames: usize,

    /// Bounded queue depth per subscriber
    pub subscriber_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rtmp_addr: "0.0.0.0:1935".parse().unwrap(),
            http_addr: "0.0.0.0:8000".parse().unwrap(),
            advertised_addr: None,
            chunk_size: 60_000,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            max_connections: 0,
            connection_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(60),
            tcp_nodelay: true,
            read_buffer_size: 64 * 1024,
            gop_cache: true,
            gop_max_bytes: gop::DEFAULT_MAX_BYTES,
            gop_max_frames: gop::DEFAULT_MAX_FRAMES,
            subscriber_queue: 256,
        }
    }
}

impl ServerConfig {
    pub fn rtmp_addr(mut self, addr: SocketAddr) -> Self {
        self.rtmp_addr = addr;
        self
    }

    pub fn http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = addr;
        self
    }

    pub fn advertised_addr(mut self, addr: IpAddr) -> Self {
        self.advertised_addr = Some(addr);
        self
    }

    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn disable_gop_cache(mut self) -> Self {
        self.gop_cache = false;
        self
    }

    pub fn gop_max_bytes(mut self, bytes: usize) -> Self {
        self.gop_max_bytes = bytes;
        self
    }

    pub fn subscriber_queue(mut self, capacity: usize) -> Self {
        self.subscriber_queue = capacity.max(1);
        self
    }

    /// Registry settings derived from this config
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::default()
            .gop_cache(self.gop_cache)
            .gop_max_bytes(self.gop_max_bytes)
            .gop_max_frames(self.gop_max_frames)
            .queue_capacity(self.subscriber_queue)
    }
}
