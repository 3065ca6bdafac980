//! Per-stream state stored in the registry

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::media::{GopCache, MediaFrame};

use super::config::RegistryConfig;
use super::key::StreamKey;

/// What a subscriber receives on its queue
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Frame(MediaFrame),
    /// The publisher disconnected; the stream is gone
    PublisherEnded,
}

/// A subscriber's handle on a stream
///
/// Dropping the receiver is not enough to detach cleanly; call
/// `StreamRegistry::unsubscribe` with this id when the session ends.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<StreamEvent>,
}

/// State for one live stream: caches for late joiners plus the
/// subscriber queues for fan-out
pub(super) struct StreamEntry {
    pub(super) key: StreamKey,
    pub(super) publisher_id: u64,
    pub(super) gop: GopCache,
    pub(super) gop_enabled: bool,
    /// Latest video decoder configuration (AVC/HEVC sequence header)
    pub(super) video_header: Option<MediaFrame>,
    /// Latest audio decoder configuration (AAC sequence header)
    pub(super) audio_header: Option<MediaFrame>,
    /// Latest onMetaData payload
    pub(super) metadata: Option<MediaFrame>,
    pub(super) subscribers: HashMap<u64, mpsc::Sender<StreamEvent>>,
}

impl StreamEntry {
    pub(super) fn new(key: StreamKey, publisher_id: u64, config: &RegistryConfig) -> Self {
        Self {
            key,
            publisher_id,
            gop: GopCache::with_limits(config.gop_max_bytes, config.gop_max_frames),
            gop_enabled: config.gop_cache,
            video_header: None,
            audio_header: None,
            metadata: None,
            subscribers: HashMap::new(),
        }
    }

    /// Update header/metadata caches and the GOP window for a new frame.
    pub(super) fn cache_frame(&mut self, frame: &MediaFrame) {
        use crate::media::FrameKind;

        match frame.kind {
            FrameKind::Metadata => {
                self.metadata = Some(frame.clone());
                return;
            }
            FrameKind::Video if frame.is_video_sequence_header() => {
                self.video_header = Some(frame.clone());
                return;
            }
            FrameKind::Audio if frame.is_audio_sequence_header() => {
                self.audio_header = Some(frame.clone());
                return;
            }
            _ => {}
        }

        if self.gop_enabled {
            self.gop.push(frame.clone());
        }
    }

    /// Frames a late joiner must receive before any live frame:
    /// metadata, then decoder configurations, then the cached GOP.
    pub(super) fn catchup_frames(&self) -> Vec<MediaFrame> {
        let mut frames = Vec::with_capacity(3 + self.gop.frame_count());
        if let Some(ref meta) = self.metadata {
            frames.push(meta.clone());
        }
        if let Some(ref video) = self.video_header {
            frames.push(video.clone());
        }
        if let Some(ref audio) = self.audio_header {
            frames.push(audio.clone());
        }
        frames.extend(self.gop.frames().cloned());
        frames
    }

    pub(super) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn entry() -> StreamEntry {
        StreamEntry::new(StreamKey::new("live", "cam1"), 1, &RegistryConfig::default())
    }

    #[test]
    fn test_headers_cached_outside_gop() {
        let mut e = entry();

        let video_header = MediaFrame::video(0, Bytes::from_static(&[0x17, 0x00, 0, 0, 0]));
        let audio_header = MediaFrame::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]));
        e.cache_frame(&video_header);
        e.cache_frame(&audio_header);

        assert!(e.video_header.is_some());
        assert!(e.audio_header.is_some());
        assert_eq!(e.gop.frame_count(), 0);
    }

    #[test]
    fn test_catchup_order() {
        let mut e = entry();

        e.cache_frame(&MediaFrame::video(0, Bytes::from_static(&[0x17, 0x00, 0, 0, 0])));
        e.cache_frame(&MediaFrame::metadata(0, Bytes::from_static(&[0x02, 0x00, 0x00])));
        e.cache_frame(&MediaFrame::video(10, Bytes::from_static(&[0x17, 0x01, 1])));
        e.cache_frame(&MediaFrame::video(43, Bytes::from_static(&[0x27, 0x01, 2])));

        let catchup = e.catchup_frames();
        assert_eq!(catchup.len(), 4);
        assert_eq!(catchup[0].kind, crate::media::FrameKind::Metadata);
        assert!(catchup[1].is_video_sequence_header());
        assert!(catchup[2].is_keyframe());
        assert_eq!(catchup[3].timestamp, 43);
    }

    #[test]
    fn test_gop_cache_disabled() {
        let config = RegistryConfig::default().gop_cache(false);
        let mut e = StreamEntry::new(StreamKey::new("live", "cam1"), 1, &config);

        e.cache_frame(&MediaFrame::video(0, Bytes::from_static(&[0x17, 0x00, 0, 0, 0])));
        e.cache_frame(&MediaFrame::video(10, Bytes::from_static(&[0x17, 0x01, 1])));

        // Headers still cached, media frames are not
        let catchup = e.catchup_frames();
        assert_eq!(catchup.len(), 1);
        assert!(catchup[0].is_video_sequence_header());
    }

    #[test]
    fn test_new_header_replaces_old() {
        let mut e = entry();

        e.cache_frame(&MediaFrame::video(0, Bytes::from_static(&[0x17, 0x00, 1])));
        e.cache_frame(&MediaFrame::video(50, Bytes::from_static(&[0x17, 0x00, 2])));

        assert_eq!(e.video_header.as_ref().unwrap().timestamp, 50);
    }
}
