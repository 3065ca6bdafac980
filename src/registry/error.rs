//! Registry error types

use super::key::StreamKey;

/// Error type for registry operations
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// Another session is already publishing to this key
    StreamKeyInUse(StreamKey),
    /// Play or subscribe against a key with no publisher
    StreamNotFound(StreamKey),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::StreamKeyInUse(key) => {
                write!(f, "Stream key already in use: {}", key)
            }
            RegistryError::StreamNotFound(key) => write!(f, "Stream not found: {}", key),
        }
    }
}

impl std::error::Error for RegistryError {}
