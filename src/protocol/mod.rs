//! Memcached ASCII protocol implementation

pub mod command;
pub mod parser;
pub mod response;

pub use command::{Command, MAX_KEY_LENGTH, is_valid_key, validate_key};
pub use parser::{Decoder, MAX_LINE_LENGTH};
pub use response::{CacheResult, ResponseWriter};
