//! Hand-written memcached ASCII protocol decoder
//!
//! Two-phase parsing:
//! 1. Scan for the command line (up to \r\n). Nothing is consumed until the
//!    whole line is buffered, and the scan resumes where the last partial
//!    scan stopped.
//! 2. For storage commands, keep the parsed header and wait for the data
//!    block plus its trailing \r\n.

use crate::ProtocolError;
use crate::protocol::command::{Command, validate_key};
use bytes::{Buf, Bytes, BytesMut};

/// Longest command line accepted before the stream is declared garbage
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Case-insensitive command comparison (avoids allocation from to_ascii_lowercase)
#[inline]
fn cmd_eq(cmd: &[u8], expected: &[u8]) -> bool {
    cmd.len() == expected.len()
        && cmd
            .iter()
            .zip(expected.iter())
            .all(|(a, b)| a.to_ascii_lowercase() == *b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageKind {
    Set,
    Cas,
}

/// Storage command header waiting for its data block
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingStorage {
    kind: StorageKind,
    key: Bytes,
    flags: u16,
    exptime: i64,
    bytes: usize,
    cas_unique: u64,
    noreply: bool,
}

impl PendingStorage {
    fn into_command(self, data: Bytes) -> Command {
        match self.kind {
            StorageKind::Set => Command::Set {
                key: self.key,
                flags: self.flags,
                exptime: self.exptime,
                data,
                noreply: self.noreply,
            },
            StorageKind::Cas => Command::Cas {
                key: self.key,
                flags: self.flags,
                exptime: self.exptime,
                cas_unique: self.cas_unique,
                data,
                noreply: self.noreply,
            },
        }
    }
}

enum Line {
    Complete(Command),
    Storage(PendingStorage),
}

/// Incremental decoder for one connection's byte stream
#[derive(Debug)]
pub struct Decoder {
    max_item_size: usize,
    pending: Option<PendingStorage>,
    /// Bytes of the current partial line already searched for \r\n
    scanned: usize,
}

impl Decoder {
    pub fn new(max_item_size: usize) -> Self {
        Self {
            max_item_size,
            pending: None,
            scanned: 0,
        }
    }

    /// True while a storage header is buffered and its data block is not
    pub fn is_awaiting_data(&self) -> bool {
        self.pending.is_some()
    }

    /// Decode every complete command in `buf`, consuming their bytes.
    ///
    /// An incomplete trailing command stays in `buf` (and in the decoder's
    /// state) until more bytes arrive.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Vec<Command>, ProtocolError> {
        let mut commands = Vec::new();
        while let Some(command) = self.decode_next(buf)? {
            commands.push(command);
        }
        Ok(commands)
    }

    /// Decode at most one command. `Ok(None)` means more data is needed.
    pub fn decode_next(&mut self, buf: &mut BytesMut) -> Result<Option<Command>, ProtocolError> {
        if self.pending.is_none() {
            let Some(line_end) = self.find_line(buf)? else {
                return Ok(None);
            };
            let line = parse_line(&buf[..line_end], self.max_item_size)?;
            buf.advance(line_end + 2);

            match line {
                Line::Complete(command) => return Ok(Some(command)),
                Line::Storage(pending) => self.pending = Some(pending),
            }
        }

        self.take_data(buf)
    }

    fn find_line(&mut self, buf: &BytesMut) -> Result<Option<usize>, ProtocolError> {
        // back up one byte in case the last scan stopped between \r and \n
        let start = self.scanned.saturating_sub(1).min(buf.len());
        match memchr::memmem::find(&buf[start..], b"\r\n") {
            Some(offset) => {
                self.scanned = 0;
                Ok(Some(start + offset))
            }
            None if buf.len() > MAX_LINE_LENGTH => {
                Err(ProtocolError::InvalidCommand("line too long".to_string()))
            }
            None => {
                self.scanned = buf.len();
                Ok(None)
            }
        }
    }

    fn take_data(&mut self, buf: &mut BytesMut) -> Result<Option<Command>, ProtocolError> {
        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };

        let data_end = pending.bytes;
        if buf.len() < data_end + 2 {
            self.pending = Some(pending);
            return Ok(None);
        }

        // Verify trailing \r\n
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(ProtocolError::BadDataChunk);
        }

        let data = Bytes::copy_from_slice(&buf[..data_end]);
        buf.advance(data_end + 2);
        Ok(Some(pending.into_command(data)))
    }
}

/// Classify one command line (without its \r\n)
fn parse_line(line: &[u8], max_item_size: usize) -> Result<Line, ProtocolError> {
    let tokens: Vec<&[u8]> = line
        .split(|&b| b == b' ')
        .filter(|part| !part.is_empty())
        .collect();

    let Some((&name, args)) = tokens.split_first() else {
        return Err(ProtocolError::InvalidCommand("empty command".to_string()));
    };

    // Match command (case-insensitive, no allocation)
    if cmd_eq(name, b"get") {
        Ok(Line::Complete(Command::Get {
            keys: parse_keys(args)?,
        }))
    } else if cmd_eq(name, b"gets") {
        Ok(Line::Complete(Command::Gets {
            keys: parse_keys(args)?,
        }))
    } else if cmd_eq(name, b"set") {
        parse_storage(StorageKind::Set, args, max_item_size).map(Line::Storage)
    } else if cmd_eq(name, b"cas") {
        parse_storage(StorageKind::Cas, args, max_item_size).map(Line::Storage)
    } else if cmd_eq(name, b"delete") {
        parse_delete(args).map(Line::Complete)
    } else {
        Err(ProtocolError::UnknownCommand(
            String::from_utf8_lossy(name).to_string(),
        ))
    }
}

/// Parse get/gets keys
fn parse_keys(args: &[&[u8]]) -> Result<Vec<Bytes>, ProtocolError> {
    if args.is_empty() {
        return Err(ProtocolError::InvalidCommand(
            "get requires at least one key".to_string(),
        ));
    }

    args.iter()
        .map(|key| {
            validate_key(key)?;
            Ok(Bytes::copy_from_slice(key))
        })
        .collect()
}

/// Parse set/cas header
/// Format: <key> <flags> <exptime> <bytes> [<cas unique>] [noreply]
fn parse_storage(
    kind: StorageKind,
    args: &[&[u8]],
    max_item_size: usize,
) -> Result<PendingStorage, ProtocolError> {
    let required = match kind {
        StorageKind::Set => 4,
        StorageKind::Cas => 5,
    };
    if args.len() < required || args.len() > required + 1 {
        return Err(ProtocolError::InvalidCommand(format!(
            "expected {required} arguments, got {}",
            args.len()
        )));
    }

    let key = args[0];
    validate_key(key)?;

    let flags = parse_num::<u16>(args[1]).ok_or(ProtocolError::InvalidFlags)?;
    let exptime = parse_num::<i64>(args[2]).ok_or(ProtocolError::InvalidExptime)?;
    let bytes = parse_num::<u32>(args[3]).ok_or(ProtocolError::InvalidBytesLength)? as usize;
    let cas_unique = match kind {
        StorageKind::Set => 0,
        StorageKind::Cas => parse_num::<u64>(args[4]).ok_or(ProtocolError::InvalidCasUnique)?,
    };
    let noreply = parse_noreply(args.get(required).copied())?;

    if bytes > max_item_size {
        return Err(ProtocolError::ValueTooLarge);
    }

    Ok(PendingStorage {
        kind,
        key: Bytes::copy_from_slice(key),
        flags,
        exptime,
        bytes,
        cas_unique,
        noreply,
    })
}

/// Parse delete command
/// Format: delete <key> [noreply]\r\n
fn parse_delete(args: &[&[u8]]) -> Result<Command, ProtocolError> {
    let (key, rest) = match args {
        [key] => (*key, None),
        [key, last] => (*key, Some(*last)),
        _ => {
            return Err(ProtocolError::InvalidCommand(
                "delete requires a key".to_string(),
            ));
        }
    };
    validate_key(key)?;

    Ok(Command::Delete {
        key: Bytes::copy_from_slice(key),
        noreply: parse_noreply(rest)?,
    })
}

/// `noreply` is only ever accepted as the final token
fn parse_noreply(token: Option<&[u8]>) -> Result<bool, ProtocolError> {
    match token {
        None => Ok(false),
        Some(b"noreply") => Ok(true),
        Some(other) => Err(ProtocolError::InvalidCommand(format!(
            "unexpected token: {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MAX_ITEM: usize = 1024 * 1024;

    fn decode_all(input: &[u8]) -> Result<Vec<Command>, ProtocolError> {
        let mut decoder = Decoder::new(MAX_ITEM);
        let mut buf = BytesMut::from(input);
        decoder.decode(&mut buf)
    }

    fn decode_one(input: &[u8]) -> Command {
        let mut commands = decode_all(input).unwrap();
        assert_eq!(commands.len(), 1, "expected exactly one command");
        commands.remove(0)
    }

    fn b(s: &'static [u8]) -> Bytes {
        Bytes::from_static(s)
    }

    #[test]
    fn test_parse_get() {
        let cmd = decode_one(b"get foo bar baz\r\n");
        assert_eq!(
            cmd,
            Command::Get {
                keys: vec![b(b"foo"), b(b"bar"), b(b"baz")]
            }
        );
    }

    #[test]
    fn test_parse_gets() {
        let cmd = decode_one(b"gets foo\r\n");
        assert_eq!(cmd, Command::Gets { keys: vec![b(b"foo")] });
    }

    #[test]
    fn test_parse_set() {
        let cmd = decode_one(b"set mykey 42 3600 5\r\nhello\r\n");
        assert_eq!(
            cmd,
            Command::Set {
                key: b(b"mykey"),
                flags: 42,
                exptime: 3600,
                data: b(b"hello"),
                noreply: false,
            }
        );
    }

    #[test]
    fn test_parse_set_noreply() {
        let cmd = decode_one(b"set mykey 0 0 3 noreply\r\nfoo\r\n");
        assert!(cmd.is_noreply());
    }

    #[test]
    fn test_parse_set_negative_exptime_and_empty_payload() {
        let cmd = decode_one(b"set k 0 -1 0\r\n\r\n");
        assert_eq!(
            cmd,
            Command::Set {
                key: b(b"k"),
                flags: 0,
                exptime: -1,
                data: Bytes::new(),
                noreply: false,
            }
        );
    }

    #[test]
    fn test_parse_payload_may_contain_crlf() {
        let cmd = decode_one(b"set k 0 0 4\r\na\r\nb\r\n");
        assert!(matches!(cmd, Command::Set { data, .. } if data.as_ref() == b"a\r\nb"));
    }

    #[test]
    fn test_parse_cas() {
        let cmd = decode_one(b"cas k 7 100 1 999 noreply\r\ny\r\n");
        assert_eq!(
            cmd,
            Command::Cas {
                key: b(b"k"),
                flags: 7,
                exptime: 100,
                cas_unique: 999,
                data: b(b"y"),
                noreply: true,
            }
        );
    }

    #[test]
    fn test_parse_delete() {
        assert_eq!(
            decode_one(b"delete mykey\r\n"),
            Command::Delete {
                key: b(b"mykey"),
                noreply: false
            }
        );
        assert_eq!(
            decode_one(b"delete mykey noreply\r\n"),
            Command::Delete {
                key: b(b"mykey"),
                noreply: true
            }
        );
    }

    #[test]
    fn test_delete_rejects_extra_tokens() {
        // only noreply may follow the key
        assert!(matches!(
            decode_all(b"delete mykey 0\r\n"),
            Err(ProtocolError::InvalidCommand(_))
        ));
        assert!(matches!(
            decode_all(b"delete a b c\r\n"),
            Err(ProtocolError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_multiple_commands_in_one_buffer() {
        let commands = decode_all(b"set a 0 0 1\r\nx\r\nget a\r\ndelete a\r\n").unwrap();
        let names: Vec<&str> = commands.iter().map(Command::name).collect();
        assert_eq!(names, vec!["set", "get", "delete"]);
    }

    #[test]
    fn test_extra_spaces_are_ignored() {
        let cmd = decode_one(b"get  foo   bar \r\n");
        assert_eq!(
            cmd,
            Command::Get {
                keys: vec![b(b"foo"), b(b"bar")]
            }
        );
    }

    #[test]
    fn test_need_more_data() {
        let mut decoder = Decoder::new(MAX_ITEM);
        let mut buf = BytesMut::from(&b"get foo"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_empty());
        assert_eq!(buf.as_ref(), b"get foo");

        buf.extend_from_slice(b"\r");
        assert!(decoder.decode(&mut buf).unwrap().is_empty());
        buf.extend_from_slice(b"\n");
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            vec![Command::Get { keys: vec![b(b"foo")] }]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_is_not_reparsed_while_waiting_for_data() {
        let mut decoder = Decoder::new(MAX_ITEM);
        let mut buf = BytesMut::from(&b"set k 1 0 5\r\nhel"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_empty());
        assert!(decoder.is_awaiting_data());
        // header consumed, partial payload kept
        assert_eq!(buf.as_ref(), b"hel");

        buf.extend_from_slice(b"lo\r\n");
        let commands = decoder.decode(&mut buf).unwrap();
        assert!(matches!(&commands[..], [Command::Set { data, .. }] if data.as_ref() == b"hello"));
        assert!(!decoder.is_awaiting_data());
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            decode_all(b"foobar key\r\n"),
            Err(ProtocolError::UnknownCommand("foobar".to_string()))
        );
    }

    #[test]
    fn test_empty_line() {
        assert!(matches!(
            decode_all(b"\r\n"),
            Err(ProtocolError::InvalidCommand(_))
        ));
        assert!(matches!(
            decode_all(b"   \r\n"),
            Err(ProtocolError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_wrong_token_counts() {
        for input in [
            &b"get\r\n"[..],
            b"set k 0 0\r\n",
            b"set k 0 0 1 noreply extra\r\n",
            b"cas k 0 0 1\r\n",
            b"delete\r\n",
        ] {
            assert!(
                matches!(decode_all(input), Err(ProtocolError::InvalidCommand(_))),
                "input {:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_noreply_only_as_final_token() {
        assert!(matches!(
            decode_all(b"set k 0 0 1 yes\r\nx\r\n"),
            Err(ProtocolError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_numeric_fields() {
        assert_eq!(
            decode_all(b"set k 65536 0 1\r\nx\r\n"),
            Err(ProtocolError::InvalidFlags)
        );
        assert_eq!(
            decode_all(b"set k 0 soon 1\r\nx\r\n"),
            Err(ProtocolError::InvalidExptime)
        );
        assert_eq!(
            decode_all(b"set k 0 0 -1\r\nx\r\n"),
            Err(ProtocolError::InvalidBytesLength)
        );
        assert_eq!(
            decode_all(b"cas k 0 0 1 abc\r\nx\r\n"),
            Err(ProtocolError::InvalidCasUnique)
        );
    }

    #[test]
    fn test_key_errors() {
        let mut long = b"get ".to_vec();
        long.extend_from_slice(&[b'a'; 251]);
        long.extend_from_slice(b"\r\n");
        assert_eq!(decode_all(&long), Err(ProtocolError::KeyTooLong));

        assert!(matches!(
            decode_all(b"set bad\x7fkey 0 0 1\r\nx\r\n"),
            Err(ProtocolError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_value_too_large() {
        let mut decoder = Decoder::new(4);
        let mut buf = BytesMut::from(&b"set k 0 0 5\r\nhello\r\n"[..]);
        assert_eq!(decoder.decode(&mut buf), Err(ProtocolError::ValueTooLarge));
    }

    #[test]
    fn test_bad_data_chunk() {
        assert_eq!(
            decode_all(b"set k 0 0 2\r\nabc\r\n"),
            Err(ProtocolError::BadDataChunk)
        );
    }

    #[test]
    fn test_line_too_long() {
        let mut decoder = Decoder::new(MAX_ITEM);
        let mut buf = BytesMut::from(&vec![b'a'; MAX_LINE_LENGTH + 1][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtocolError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_case_insensitive_commands() {
        assert!(matches!(decode_one(b"GET foo\r\n"), Command::Get { .. }));
        assert!(matches!(decode_one(b"Gets foo\r\n"), Command::Gets { .. }));
        assert!(matches!(
            decode_one(b"SET mykey 0 0 3\r\nbar\r\n"),
            Command::Set { .. }
        ));
        assert!(matches!(decode_one(b"DeLeTe k\r\n"), Command::Delete { .. }));
    }

    fn sample_stream() -> Vec<u8> {
        b"set alpha 3 0 5\r\nhello\r\n\
          get alpha beta\r\n\
          cas alpha 0 100 4 12 noreply\r\nw\r\nx\r\n\
          gets alpha\r\n\
          delete alpha noreply\r\n"
            .to_vec()
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_result(
            cuts in proptest::collection::vec(0usize..200, 0..12)
        ) {
            let stream = sample_stream();
            let expected = decode_all(&stream).unwrap();

            let mut points: Vec<usize> = cuts.into_iter().map(|c| c % (stream.len() + 1)).collect();
            points.sort_unstable();
            points.push(stream.len());

            let mut decoder = Decoder::new(MAX_ITEM);
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            let mut start = 0;
            for end in points {
                buf.extend_from_slice(&stream[start..end]);
                start = end;
                decoded.extend(decoder.decode(&mut buf).unwrap());
            }

            prop_assert_eq!(decoded, expected);
            prop_assert!(buf.is_empty());
        }
    }
}
