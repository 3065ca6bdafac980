//! RTMP protocol constants
//!
//! Wire-level numbers from the RTMP specification plus the command and
//! status-code strings used by the AMF command plane.

/// RTMP protocol version (C0/S0)
pub const RTMP_VERSION: u8 = 3;

/// Size of the C1/S1/C2/S2 handshake packets
pub const HANDSHAKE_SIZE: usize = 1536;

/// Chunk size every connection starts with, until SetChunkSize
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Largest chunk size we accept from a SetChunkSize message
pub const MAX_CHUNK_SIZE: u32 = 0x00FF_FFFF;

/// Timestamp value that signals an extended (32-bit) timestamp field
pub const EXTENDED_TIMESTAMP: u32 = 0x00FF_FFFF;

/// Sanity limit on a single assembled message
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Default acknowledgement window advertised to peers
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;

// Chunk stream IDs we allocate for outbound messages
pub const CSID_PROTOCOL: u32 = 2;
pub const CSID_COMMAND: u32 = 3;
pub const CSID_AUDIO: u32 = 4;
pub const CSID_DATA: u32 = 5;
pub const CSID_VIDEO: u32 = 6;

// Message type IDs
pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACK: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_DATA_AMF3: u8 = 15;
pub const MSG_COMMAND_AMF3: u8 = 17;
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_COMMAND_AMF0: u8 = 20;

// User control event types
pub const EVENT_STREAM_BEGIN: u16 = 0;
pub const EVENT_STREAM_EOF: u16 = 1;
pub const EVENT_PING_REQUEST: u16 = 6;
pub const EVENT_PING_RESPONSE: u16 = 7;

// Command names
pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_CLOSE_STREAM: &str = "closeStream";
pub const CMD_RELEASE_STREAM: &str = "releaseStream";
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_FC_UNPUBLISH: &str = "FCUnpublish";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PLAY: &str = "play";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";
pub const CMD_ON_STATUS: &str = "onStatus";

// NetConnection / NetStream status codes
pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NC_CONNECT_REJECTED: &str = "NetConnection.Connect.Rejected";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PUBLISH_BADNAME: &str = "NetStream.Publish.BadName";
pub const NS_UNPUBLISH_SUCCESS: &str = "NetStream.Unpublish.Success";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PLAY_RESET: &str = "NetStream.Play.Reset";
pub const NS_PLAY_STREAM_NOT_FOUND: &str = "NetStream.Play.StreamNotFound";
pub const NS_PLAY_UNPUBLISH_NOTIFY: &str = "NetStream.Play.UnpublishNotify";
