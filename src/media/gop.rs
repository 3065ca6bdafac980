//! GOP (Group of Pictures) cache for late-joiner support
//!
//! A viewer joining mid-stream needs the most recent keyframe and every
//! frame after it before a decoder can produce pictures. The cache keeps
//! exactly that window: each keyframe clears it and starts a new GOP.
//!
//! Sequence headers and metadata live on the stream entry, not here.

use std::collections::VecDeque;

use super::frame::MediaFrame;

/// Default cap on cached bytes per stream
pub const DEFAULT_MAX_BYTES: usize = 4 * 1024 * 1024;
/// Default cap on cached frame count per stream
pub const DEFAULT_MAX_FRAMES: usize = 1024;

/// Bounded frame cache covering the current GOP
#[derive(Debug)]
pub struct GopCache {
    max_bytes: usize,
    max_frames: usize,
    bytes: usize,
    frames: VecDeque<MediaFrame>,
    /// Oldest frames were evicted, so the window no longer starts at a
    /// keyframe. Catch-up is best effort until the next keyframe.
    degraded: bool,
}

impl GopCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_BYTES, DEFAULT_MAX_FRAMES)
    }

    pub fn with_limits(max_bytes: usize, max_frames: usize) -> Self {
        Self {
            max_bytes,
            max_frames,
            bytes: 0,
            frames: VecDeque::new(),
            degraded: false,
        }
    }

    /// Add a frame. A keyframe starts a new GOP and clears the window.
    /// Never fails: when a GOP outgrows the bounds the oldest frames are
    /// evicted and the cache degrades until the next keyframe.
    pub fn push(&mut self, frame: MediaFrame) {
        if frame.is_keyframe() {
            self.clear();
        }

        self.bytes += frame.len();
        self.frames.push_back(frame);

        let mut evicted = false;
        while self.frames.len() > self.max_frames
            || (self.bytes > self.max_bytes && self.frames.len() > 1)
        {
            if let Some(old) = self.frames.pop_front() {
                self.bytes -= old.len();
                evicted = true;
            }
        }
        if evicted && !self.degraded {
            self.degraded = true;
            tracing::warn!(
                frames = self.frames.len(),
                bytes = self.bytes,
                "gop exceeded cache bounds, catch-up degraded until next keyframe"
            );
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.bytes = 0;
        self.degraded = false;
    }

    /// Cached frames in arrival order
    pub fn frames(&self) -> impl Iterator<Item = &MediaFrame> {
        self.frames.iter()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Window starts at a keyframe, so a late joiner can decode from the
    /// first cached frame.
    pub fn starts_at_keyframe(&self) -> bool {
        self.frames
            .front()
            .map(|f| f.is_keyframe())
            .unwrap_or(false)
    }
}

impl Default for GopCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn video(timestamp: u32, keyframe: bool, size: usize) -> MediaFrame {
        let mut data = vec![0u8; size.max(2)];
        data[0] = if keyframe { 0x17 } else { 0x27 };
        data[1] = 0x01;
        MediaFrame::video(timestamp, Bytes::from(data))
    }

    fn audio(timestamp: u32, size: usize) -> MediaFrame {
        let mut data = vec![0u8; size.max(2)];
        data[0] = 0xAF;
        data[1] = 0x01;
        MediaFrame::audio(timestamp, Bytes::from(data))
    }

    #[test]
    fn test_keyframe_starts_new_gop() {
        let mut cache = GopCache::new();

        cache.push(video(0, true, 500));
        cache.push(video(33, false, 200));
        cache.push(audio(40, 50));
        assert_eq!(cache.frame_count(), 3);

        cache.push(video(100, true, 500));
        assert_eq!(cache.frame_count(), 1);
        assert!(cache.starts_at_keyframe());
    }

    #[test]
    fn test_frames_in_arrival_order() {
        let mut cache = GopCache::new();
        cache.push(video(0, true, 100));
        cache.push(audio(10, 50));
        cache.push(video(33, false, 100));

        let timestamps: Vec<u32> = cache.frames().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![0, 10, 33]);
    }

    #[test]
    fn test_byte_bound_evicts_oldest() {
        let mut cache = GopCache::with_limits(1000, 100);

        cache.push(video(0, true, 400));
        cache.push(video(33, false, 400));
        assert!(!cache.is_degraded());

        // Pushes the total over 1000 bytes; the keyframe gets evicted
        cache.push(video(66, false, 400));
        assert!(cache.byte_size() <= 1000);
        assert!(cache.is_degraded());
        assert!(!cache.starts_at_keyframe());
    }

    #[test]
    fn test_frame_count_bound() {
        let mut cache = GopCache::with_limits(usize::MAX, 3);

        cache.push(video(0, true, 10));
        for i in 1..10 {
            cache.push(video(i * 33, false, 10));
        }
        assert_eq!(cache.frame_count(), 3);
        assert!(cache.is_degraded());
    }

    #[test]
    fn test_degraded_resets_on_keyframe() {
        let mut cache = GopCache::with_limits(usize::MAX, 2);

        cache.push(video(0, true, 10));
        cache.push(video(33, false, 10));
        cache.push(video(66, false, 10));
        assert!(cache.is_degraded());

        cache.push(video(100, true, 10));
        assert!(!cache.is_degraded());
        assert!(cache.starts_at_keyframe());
        assert_eq!(cache.frame_count(), 1);
    }

    #[test]
    fn test_single_oversized_frame_kept() {
        // One frame larger than max_bytes is still cached; the bound
        // only evicts when more than one frame is present.
        let mut cache = GopCache::with_limits(100, 10);
        cache.push(video(0, true, 500));
        assert_eq!(cache.frame_count(), 1);
    }

    #[test]
    fn test_clear() {
        let mut cache = GopCache::new();
        cache.push(video(0, true, 100));
        cache.push(audio(5, 20));

        cache.clear();
        assert_eq!(cache.frame_count(), 0);
        assert_eq!(cache.byte_size(), 0);
        assert!(!cache.starts_at_keyframe());
    }
}
