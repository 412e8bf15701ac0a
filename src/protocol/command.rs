//! Memcached ASCII protocol command types

use crate::ProtocolError;
use bytes::Bytes;

/// Maximum key length accepted by memcached
pub const MAX_KEY_LENGTH: usize = 250;

/// Parsed memcached command. Keys and payloads are owned so a command can
/// outlive the read buffer it was decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// get <key>+
    Get { keys: Vec<Bytes> },

    /// gets <key>+
    Gets { keys: Vec<Bytes> },

    /// set <key> <flags> <exptime> <bytes> [noreply]
    Set {
        key: Bytes,
        flags: u16,
        exptime: i64,
        data: Bytes,
        noreply: bool,
    },

    /// cas <key> <flags> <exptime> <bytes> <cas unique> [noreply]
    Cas {
        key: Bytes,
        flags: u16,
        exptime: i64,
        cas_unique: u64,
        data: Bytes,
        noreply: bool,
    },

    /// delete <key> [noreply]
    Delete { key: Bytes, noreply: bool },
}

impl Command {
    /// Returns true if this command should not send a response
    pub fn is_noreply(&self) -> bool {
        match self {
            Command::Set { noreply, .. }
            | Command::Cas { noreply, .. }
            | Command::Delete { noreply, .. } => *noreply,
            Command::Get { .. } | Command::Gets { .. } => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::Gets { .. } => "gets",
            Command::Set { .. } => "set",
            Command::Cas { .. } => "cas",
            Command::Delete { .. } => "delete",
        }
    }
}

/// Check if a key is valid
pub fn is_valid_key(key: &[u8]) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return false;
    }
    // Keys cannot contain control characters or whitespace
    key.iter().all(|&b| b > 32 && b < 127)
}

/// Like [`is_valid_key`], but says what is wrong
pub fn validate_key(key: &[u8]) -> Result<(), ProtocolError> {
    if is_valid_key(key) {
        Ok(())
    } else if key.len() > MAX_KEY_LENGTH {
        Err(ProtocolError::KeyTooLong)
    } else {
        Err(ProtocolError::InvalidKey(
            String::from_utf8_lossy(key).to_string(),
        ))
    }
}
