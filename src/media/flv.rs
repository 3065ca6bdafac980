//! FLV byte-level helpers
//!
//! RTMP audio/video message payloads are FLV tag bodies. The first bytes
//! classify the frame:
//!
//! ```text
//! Video: | FrameType (4 bits) | CodecID (4 bits) | AVCPacketType (1) | ...
//! Audio: | SoundFormat (4 bits) | rate/size/type (4 bits) | AACPacketType (1) | ...
//! ```
//!
//! This module also serializes frames into an FLV file stream (header +
//! tags with back-pointers) for HTTP-FLV viewers.

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::{FrameKind, MediaFrame};

/// FLV tag type ids
pub const TAG_AUDIO: u8 = 8;
pub const TAG_VIDEO: u8 = 9;
pub const TAG_SCRIPT: u8 = 18;

const FRAME_TYPE_KEYFRAME: u8 = 1;
const FRAME_TYPE_GENERATED_KEYFRAME: u8 = 4;
const CODEC_AVC: u8 = 7;
const CODEC_HEVC: u8 = 12;
const SOUND_FORMAT_AAC: u8 = 10;

/// Keyframe per the video tag header (generated keyframes count too)
pub fn is_video_keyframe(data: &[u8]) -> bool {
    match data.first() {
        Some(b) => {
            let frame_type = b >> 4;
            frame_type == FRAME_TYPE_KEYFRAME || frame_type == FRAME_TYPE_GENERATED_KEYFRAME
        }
        None => false,
    }
}

/// AVC/HEVC decoder configuration record (packet type 0)
pub fn is_video_sequence_header(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let codec = data[0] & 0x0F;
    (codec == CODEC_AVC || codec == CODEC_HEVC) && data[1] == 0
}

/// AAC AudioSpecificConfig (packet type 0)
pub fn is_audio_sequence_header(data: &[u8]) -> bool {
    data.len() >= 2 && (data[0] >> 4) == SOUND_FORMAT_AAC && data[1] == 0
}

/// FLV file header plus the zero PreviousTagSize that precedes the first tag.
pub fn file_header(has_audio: bool, has_video: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(13);
    buf.put_slice(b"FLV");
    buf.put_u8(1); // version
    buf.put_u8(u8::from(has_audio) << 2 | u8::from(has_video));
    buf.put_u32(9); // header size
    buf.put_u32(0); // PreviousTagSize0
    buf.freeze()
}

/// Serialize one frame as an FLV tag followed by its PreviousTagSize.
pub fn encode_tag(frame: &MediaFrame) -> Bytes {
    let tag_type = match frame.kind {
        FrameKind::Audio => TAG_AUDIO,
        FrameKind::Video => TAG_VIDEO,
        FrameKind::Metadata => TAG_SCRIPT,
    };
    let data_size = frame.data.len() as u32;
    let ts = frame.timestamp;

    let mut buf = BytesMut::with_capacity(11 + frame.data.len() + 4);
    buf.put_u8(tag_type);
    buf.put_u8((data_size >> 16) as u8);
    buf.put_u8((data_size >> 8) as u8);
    buf.put_u8(data_size as u8);
    // Timestamp: lower 24 bits, then the extension byte
    buf.put_u8((ts >> 16) as u8);
    buf.put_u8((ts >> 8) as u8);
    buf.put_u8(ts as u8);
    buf.put_u8((ts >> 24) as u8);
    // StreamID, always 0
    buf.put_u8(0);
    buf.put_u8(0);
    buf.put_u8(0);
    buf.put_slice(&frame.data);
    buf.put_u32(11 + data_size);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_classification() {
        assert!(is_video_keyframe(&[0x17, 0x01]));
        assert!(is_video_keyframe(&[0x47, 0x01])); // generated keyframe
        assert!(!is_video_keyframe(&[0x27, 0x01]));
        assert!(!is_video_keyframe(&[]));

        assert!(is_video_sequence_header(&[0x17, 0x00]));
        assert!(is_video_sequence_header(&[0x1C, 0x00])); // HEVC
        assert!(!is_video_sequence_header(&[0x17, 0x01]));
        assert!(!is_video_sequence_header(&[0x12, 0x00])); // H.263 has no packet type
        assert!(!is_video_sequence_header(&[0x17]));
    }

    #[test]
    fn test_audio_classification() {
        assert!(is_audio_sequence_header(&[0xAF, 0x00]));
        assert!(!is_audio_sequence_header(&[0xAF, 0x01]));
        assert!(!is_audio_sequence_header(&[0x2F, 0x00])); // MP3
        assert!(!is_audio_sequence_header(&[0xAF]));
    }

    #[test]
    fn test_file_header_layout() {
        let header = file_header(true, true);
        assert_eq!(header.len(), 13);
        assert_eq!(&header[0..3], b"FLV");
        assert_eq!(header[3], 1);
        assert_eq!(header[4], 0b101); // audio + video flags
        assert_eq!(&header[5..9], &[0, 0, 0, 9]);
        assert_eq!(&header[9..13], &[0, 0, 0, 0]);

        let video_only = file_header(false, true);
        assert_eq!(video_only[4], 0b001);
    }

    #[test]
    fn test_tag_layout() {
        let frame = MediaFrame::video(0x012345, Bytes::from_static(&[0x17, 0x01, 0xAA]));
        let tag = encode_tag(&frame);

        assert_eq!(tag.len(), 11 + 3 + 4);
        assert_eq!(tag[0], TAG_VIDEO);
        assert_eq!(&tag[1..4], &[0, 0, 3]); // data size
        assert_eq!(&tag[4..7], &[0x01, 0x23, 0x45]); // timestamp low 24
        assert_eq!(tag[7], 0); // timestamp extension
        assert_eq!(&tag[8..11], &[0, 0, 0]); // stream id
        assert_eq!(&tag[11..14], &[0x17, 0x01, 0xAA]);
        assert_eq!(&tag[14..18], &[0, 0, 0, 14]); // previous tag size
    }

    #[test]
    fn test_tag_timestamp_extension() {
        let frame = MediaFrame::audio(0x0100_0000, Bytes::from_static(&[0xAF, 0x01]));
        let tag = encode_tag(&frame);
        assert_eq!(&tag[4..7], &[0, 0, 0]);
        assert_eq!(tag[7], 0x01);
    }

    #[test]
    fn test_metadata_tag_type() {
        let frame = MediaFrame::metadata(0, Bytes::from_static(&[0x02, 0x00, 0x00]));
        let tag = encode_tag(&frame);
        assert_eq!(tag[0], TAG_SCRIPT);
    }
}
