//! Unified error types for camrelay
//!
//! All failures are local to one connection: an error returned from a session
//! task closes that session and nothing else. The only process-level failures
//! are bind errors at startup, which surface as `Error::Io` from the server
//! run methods.

use std::fmt;
use std::io;

use crate::registry::RegistryError;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all server operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// RTMP protocol violation (malformed bytes), connection is closed
    Protocol(ProtocolError),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// Well-formed command with bad arguments (empty app/stream name, etc.)
    InvalidRequest(String),
    /// Stream registry rejection (key in use, stream not found)
    Registry(RegistryError),
    /// Subscriber could not keep up and was dropped
    Backpressure,
    /// Operation timed out
    Timeout,
    /// Connection was closed by the peer
    ConnectionClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Backpressure => write!(f, "Subscriber queue overflowed"),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Error::Registry(err)
    }
}

/// Protocol-level errors from the chunk demuxer and message parser
#[derive(Debug)]
pub enum ProtocolError {
    /// Malformed chunk basic or message header
    InvalidChunkHeader,
    /// Compressed chunk header (fmt 1-3) on a chunk stream with no prior
    /// full header to inherit from
    UnknownChunkStream(u32),
    /// Declared message length above the sanity limit
    MessageTooLarge { size: u32, max: u32 },
    /// Control message payload shorter than its fixed layout
    TruncatedControl(u8),
    /// Command message that could not be interpreted
    InvalidCommand(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::UnknownChunkStream(id) => {
                write!(f, "Chunk stream {} referenced before a full header", id)
            }
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::TruncatedControl(t) => {
                write!(f, "Truncated control message (type {})", t)
            }
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF0 encoding/decoding errors
#[derive(Debug)]
pub enum AmfError {
    UnknownMarker(u8),
    UnexpectedEof,
    InvalidUtf8,
    InvalidObjectEnd,
    NestingTooDeep,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::InvalidObjectEnd => write!(f, "Invalid object end marker"),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    /// C0 carried an unsupported protocol version
    InvalidVersion(u8),
    /// Peer's C2 did not echo our S1 random bytes
    EchoMismatch,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::EchoMismatch => write!(f, "Handshake echo mismatch"),
        }
    }
}

impl std::error::Error for HandshakeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let err = Error::Protocol(ProtocolError::UnknownChunkStream(7));
        assert!(err.to_string().contains("7"));

        let err = Error::InvalidRequest("empty stream name".into());
        assert!(err.to_string().contains("empty stream name"));

        let err = Error::Backpressure;
        assert!(err.to_string().contains("overflow"));

        let err = Error::Handshake(HandshakeError::EchoMismatch);
        assert!(err.to_string().contains("echo"));
    }

    #[test]
    fn test_from_conversions() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let err: Error = ProtocolError::InvalidChunkHeader.into();
        assert!(matches!(err, Error::Protocol(_)));

        let err: Error = AmfError::UnexpectedEof.into();
        assert!(matches!(err, Error::Amf(_)));

        let err: Error = HandshakeError::InvalidVersion(1).into();
        assert!(matches!(err, Error::Handshake(_)));
    }

    #[test]
    fn test_error_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err = Error::Io(io_err);
        assert!(StdError::source(&err).is_some());

        let err = Error::Timeout;
        assert!(StdError::source(&err).is_none());
    }
}
