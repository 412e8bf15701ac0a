//! Command dispatch: one decoded command in, one result out

use crate::cache::CacheEngine;
use crate::metrics::Metrics;
use crate::protocol::{CacheResult, Command};

/// Execute a parsed command against the engine
pub fn execute(engine: &CacheEngine, cmd: Command) -> CacheResult {
    match cmd {
        Command::Get { keys } => CacheResult::Get(engine.get_many(&keys)),
        Command::Gets { keys } => CacheResult::Gets(engine.get_many(&keys)),
        Command::Set {
            key,
            flags,
            exptime,
            data,
            ..
        } => CacheResult::Store(engine.set(key, data, exptime, flags)),
        Command::Cas {
            key,
            flags,
            exptime,
            cas_unique,
            data,
            ..
        } => CacheResult::Store(engine.cas(key, data, exptime, cas_unique, flags)),
        Command::Delete { key, .. } => CacheResult::Delete(engine.delete_key(&key)),
    }
}

/// Count a command before it runs
pub(crate) fn record(metrics: &Metrics, cmd: &Command) {
    match cmd {
        Command::Get { .. } => metrics.cmd_get.inc(),
        Command::Gets { .. } => metrics.cmd_gets.inc(),
        Command::Set { .. } => metrics.cmd_set.inc(),
        Command::Cas { .. } => metrics.cmd_cas.inc(),
        Command::Delete { .. } => metrics.cmd_delete.inc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DeleteStatus, EventBus, StoreStatus};
    use crate::protocol::{Decoder, ResponseWriter};
    use bytes::BytesMut;

    /// Decode `input`, execute every command, encode every reply
    fn exchange(engine: &CacheEngine, input: &[u8]) -> Vec<u8> {
        let mut decoder = Decoder::new(1024 * 1024);
        let mut buf = BytesMut::from(input);
        let mut writer = ResponseWriter::default();
        for cmd in decoder.decode(&mut buf).unwrap() {
            let noreply = cmd.is_noreply();
            let result = execute(engine, cmd);
            if !noreply {
                writer.write_result(&result);
            }
        }
        writer.take().to_vec()
    }

    #[test]
    fn test_set_then_get() {
        let engine = CacheEngine::new(EventBus::new());
        assert_eq!(exchange(&engine, b"set foo 0 0 3\r\nbar\r\n"), b"STORED\r\n".to_vec());
        assert_eq!(
            exchange(&engine, b"get foo\r\n"),
            b"VALUE foo 0 3\r\nbar\r\nEND\r\n".to_vec()
        );
    }

    #[test]
    fn test_delete_missing() {
        let engine = CacheEngine::new(EventBus::new());
        assert_eq!(exchange(&engine, b"delete missing\r\n"), b"NOT_FOUND\r\n".to_vec());
    }

    #[test]
    fn test_cas_with_wrong_token() {
        let engine = CacheEngine::new(EventBus::new());
        assert_eq!(exchange(&engine, b"set k 0 0 1\r\nx\r\n"), b"STORED\r\n".to_vec());
        assert_eq!(
            exchange(&engine, b"cas k 0 0 1 999\r\ny\r\n"),
            b"EXISTS\r\n".to_vec()
        );
    }

    #[test]
    fn test_gets_token_round_trips_into_cas() {
        let engine = CacheEngine::new(EventBus::new());
        exchange(&engine, b"set k 3 0 1\r\nx\r\n");

        let token = engine.get(b"k").unwrap().value.cas_unique();
        let expected = format!("VALUE k 3 1 {token}\r\nx\r\nEND\r\n");
        assert_eq!(exchange(&engine, b"gets k\r\n"), expected.into_bytes());

        let cas = format!("cas k 4 0 1 {token}\r\ny\r\n");
        assert_eq!(exchange(&engine, cas.as_bytes()), b"STORED\r\n".to_vec());
        assert_eq!(
            exchange(&engine, b"get k\r\n"),
            b"VALUE k 4 1\r\ny\r\nEND\r\n".to_vec()
        );
    }

    #[test]
    fn test_noreply_suppresses_output() {
        let engine = CacheEngine::new(EventBus::new());
        assert!(exchange(&engine, b"set k 0 0 1 noreply\r\nx\r\ndelete k noreply\r\n").is_empty());
        assert!(engine.is_empty());
    }

    #[test]
    fn test_multi_get_skips_misses() {
        let engine = CacheEngine::new(EventBus::new());
        exchange(&engine, b"set a 1 0 1\r\n1\r\nset c 3 0 1\r\n3\r\n");
        assert_eq!(
            exchange(&engine, b"get a b c\r\n"),
            b"VALUE a 1 1\r\n1\r\nVALUE c 3 1\r\n3\r\nEND\r\n".to_vec()
        );
    }

    #[test]
    fn test_execute_results() {
        let engine = CacheEngine::new(EventBus::new());
        let mut decoder = Decoder::new(1024);
        let mut buf = BytesMut::from(&b"set k 0 -1 1\r\nx\r\ndelete k\r\n"[..]);
        let results: Vec<CacheResult> = decoder
            .decode(&mut buf)
            .unwrap()
            .into_iter()
            .map(|cmd| execute(&engine, cmd))
            .collect();
        assert_eq!(
            results,
            vec![
                CacheResult::Store(StoreStatus::NotStored),
                CacheResult::Delete(DeleteStatus::NotFound),
            ]
        );
    }

    #[test]
    fn test_record_counts_commands() {
        let metrics = Metrics::new().unwrap();
        record(&metrics, &Command::Gets { keys: Vec::new() });
        record(&metrics, &Command::Gets { keys: Vec::new() });
        assert_eq!(metrics.cmd_gets.get(), 2);
        assert_eq!(metrics.cmd_get.get(), 0);
    }
}
