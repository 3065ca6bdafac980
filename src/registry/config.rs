//! Registry configuration

use crate::media::gop;

/// Tuning knobs for the stream registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Cache the current GOP for late joiners
    pub gop_cache: bool,
    /// Per-stream byte cap on the GOP cache
    pub gop_max_bytes: usize,
    /// Per-stream frame count cap on the GOP cache
    pub gop_max_frames: usize,
    /// Bounded queue depth per subscriber; a full queue drops the subscriber
    pub queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            gop_cache: true,
            gop_max_bytes: gop::DEFAULT_MAX_BYTES,
            gop_max_frames: gop::DEFAULT_MAX_FRAMES,
            queue_capacity: 256,
        }
    }
}

impl RegistryConfig {
    pub fn gop_cache(mut self, enabled: bool) -> Self {
        self.gop_cache = enabled;
        self
    }

    pub fn gop_max_bytes(mut self, bytes: usize) -> Self {
        self.gop_max_bytes = bytes;
        self
    }

    pub fn gop_max_frames(mut self, frames: usize) -> Self {
        self.gop_max_frames = frames;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}
