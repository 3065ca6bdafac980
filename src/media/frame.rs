//! Media frame shared between the registry and subscribers
//!
//! A frame is immutable once parsed; its payload is a refcounted `Bytes`
//! so the GOP cache and every subscriber queue share one copy.

use bytes::Bytes;

use super::flv;

/// Kind of media frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Audio,
    Video,
    /// AMF data message (onMetaData), re-encoded as a script tag for viewers
    Metadata,
}

/// One audio, video or metadata frame with its RTMP timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFrame {
    pub kind: FrameKind,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Message payload as it appeared on the wire (FLV tag body)
    pub data: Bytes,
}

impl MediaFrame {
    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: FrameKind::Audio,
            timestamp,
            data,
        }
    }

    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: FrameKind::Video,
            timestamp,
            data,
        }
    }

    pub fn metadata(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: FrameKind::Metadata,
            timestamp,
            data,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == FrameKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == FrameKind::Audio
    }

    /// Keyframe per the FLV video tag header (seekable starting point)
    pub fn is_keyframe(&self) -> bool {
        self.kind == FrameKind::Video && flv::is_video_keyframe(&self.data)
    }

    /// AVC/HEVC decoder configuration record
    pub fn is_video_sequence_header(&self) -> bool {
        self.kind == FrameKind::Video && flv::is_video_sequence_header(&self.data)
    }

    /// AAC AudioSpecificConfig
    pub fn is_audio_sequence_header(&self) -> bool {
        self.kind == FrameKind::Audio && flv::is_audio_sequence_header(&self.data)
    }

    /// Sequence headers are cached separately from the GOP and replayed
    /// to every late joiner first.
    pub fn is_sequence_header(&self) -> bool {
        self.is_video_sequence_header() || self.is_audio_sequence_header()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
