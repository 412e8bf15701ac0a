//! Error types for LodeCache

use thiserror::Error;

/// Main error type for LodeCache
#[derive(Error, Debug)]
pub enum LodeCacheError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// How a decode failure is reported on the wire before the connection is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `ERROR` - unknown or malformed command, never carries a message
    Error,
    /// `CLIENT_ERROR <msg>` - well-formed but semantically invalid input
    ClientError,
    /// `SERVER_ERROR <msg>` - anything else
    ServerError,
}

/// Protocol decoding errors
///
/// Every variant is terminal for the connection: once the stream is out of
/// sync there is no defined way to find the next command boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid flags")]
    InvalidFlags,

    #[error("Invalid exptime")]
    InvalidExptime,

    #[error("Invalid bytes length")]
    InvalidBytesLength,

    #[error("Invalid cas unique")]
    InvalidCasUnique,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key too long (max 250 bytes)")]
    KeyTooLong,

    #[error("object too large for cache")]
    ValueTooLarge,

    #[error("bad data chunk")]
    BadDataChunk,
}

impl ProtocolError {
    /// Wire error class for this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::UnknownCommand(_)
            | ProtocolError::InvalidCommand(_)
            | ProtocolError::InvalidFlags
            | ProtocolError::InvalidExptime
            | ProtocolError::InvalidBytesLength
            | ProtocolError::InvalidCasUnique => ErrorKind::Error,
            ProtocolError::InvalidKey(_)
            | ProtocolError::KeyTooLong
            | ProtocolError::ValueTooLarge
            | ProtocolError::BadDataChunk => ErrorKind::ClientError,
        }
    }
}

/// Cache maintenance errors (LRU consumer, reaper)
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Evictor is no longer available")]
    EvictorGone,

    #[error("LRU manager already started")]
    AlreadyStarted,

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} needs a running tokio runtime")]
    NoRuntime { name: &'static str },
}

pub type Result<T> = std::result::Result<T, LodeCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_kinds() {
        assert_eq!(
            ProtocolError::UnknownCommand("foobar".into()).kind(),
            ErrorKind::Error
        );
        assert_eq!(ProtocolError::InvalidFlags.kind(), ErrorKind::Error);
        assert_eq!(ProtocolError::KeyTooLong.kind(), ErrorKind::ClientError);
        assert_eq!(ProtocolError::BadDataChunk.kind(), ErrorKind::ClientError);
    }

    #[test]
    fn test_client_error_messages() {
        assert_eq!(ProtocolError::BadDataChunk.to_string(), "bad data chunk");
        assert_eq!(
            ProtocolError::ValueTooLarge.to_string(),
            "object too large for cache"
        );
    }
}
