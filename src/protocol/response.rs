//! Memcached ASCII protocol response builder

use crate::cache::{CacheEntry, DeleteStatus, StoreStatus};
use crate::error::{ErrorKind, ProtocolError};
use bytes::BytesMut;
use itoa::Buffer;

/// Outcome of one executed command, ready to be encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheResult {
    Get(Vec<CacheEntry>),
    Gets(Vec<CacheEntry>),
    Store(StoreStatus),
    Delete(DeleteStatus),
    Error {
        kind: ErrorKind,
        message: Option<String>,
    },
}

impl CacheResult {
    pub fn server_error(message: impl Into<String>) -> Self {
        CacheResult::Error {
            kind: ErrorKind::ServerError,
            message: Some(message.into()),
        }
    }
}

impl From<&ProtocolError> for CacheResult {
    fn from(err: &ProtocolError) -> Self {
        let kind = err.kind();
        let message = match kind {
            ErrorKind::Error => None,
            ErrorKind::ClientError | ErrorKind::ServerError => Some(err.to_string()),
        };
        CacheResult::Error { kind, message }
    }
}

/// Response writer for memcached ASCII protocol
pub struct ResponseWriter {
    buf: BytesMut,
}

impl ResponseWriter {
    /// Create a new response writer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the internal buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Take the buffer, leaving an empty buffer in its place
    pub fn take(&mut self) -> BytesMut {
        std::mem::take(&mut self.buf)
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Returns true if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a whole result
    pub fn write_result(&mut self, result: &CacheResult) {
        match result {
            CacheResult::Get(entries) => {
                for entry in entries {
                    self.value(&entry.key, entry.value.flags(), entry.value.data());
                }
                self.end();
            }
            CacheResult::Gets(entries) => {
                for entry in entries {
                    self.value_with_cas(
                        &entry.key,
                        entry.value.flags(),
                        entry.value.data(),
                        entry.value.cas_unique(),
                    );
                }
                self.end();
            }
            CacheResult::Store(status) => self.status(status.as_str()),
            CacheResult::Delete(status) => self.status(status.as_str()),
            CacheResult::Error { kind, message } => self.error(*kind, message.as_deref()),
        }
    }

    /// Write a VALUE line for get response
    /// Format: VALUE <key> <flags> <bytes>\r\n<data>\r\n
    pub fn value(&mut self, key: &[u8], flags: u16, data: &[u8]) {
        self.value_header(key, flags, data.len());
        self.buf.extend_from_slice(b"\r\n");
        self.value_data(data);
    }

    /// Write a VALUE line for gets response
    /// Format: VALUE <key> <flags> <bytes> <cas unique>\r\n<data>\r\n
    pub fn value_with_cas(&mut self, key: &[u8], flags: u16, data: &[u8], cas_unique: u64) {
        let mut itoa_buf = Buffer::new();
        self.value_header(key, flags, data.len());
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(cas_unique).as_bytes());
        self.buf.extend_from_slice(b"\r\n");
        self.value_data(data);
    }

    /// Write END to terminate get response
    pub fn end(&mut self) {
        self.buf.extend_from_slice(b"END\r\n");
    }

    /// Write a single status line such as STORED or NOT_FOUND
    pub fn status(&mut self, status: &str) {
        self.buf.extend_from_slice(status.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write ERROR, CLIENT_ERROR <msg> or SERVER_ERROR <msg>
    ///
    /// A plain `ERROR` never carries a message.
    pub fn error(&mut self, kind: ErrorKind, message: Option<&str>) {
        let prefix: &[u8] = match kind {
            ErrorKind::Error => {
                self.buf.extend_from_slice(b"ERROR\r\n");
                return;
            }
            ErrorKind::ClientError => b"CLIENT_ERROR",
            ErrorKind::ServerError => b"SERVER_ERROR",
        };
        self.buf.extend_from_slice(prefix);
        if let Some(message) = message {
            self.buf.extend_from_slice(b" ");
            self.buf.extend_from_slice(message.as_bytes());
        }
        self.buf.extend_from_slice(b"\r\n");
    }

    fn value_header(&mut self, key: &[u8], flags: u16, len: usize) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(b"VALUE ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(flags).as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf.extend_from_slice(itoa_buf.format(len).as_bytes());
    }

    fn value_data(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new(4096)
    }
}
