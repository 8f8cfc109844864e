//! Which commands the proxy forwards, answers itself, or refuses.

use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Forbidden,
    Local(LocalCommand),
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCommand {
    Ping,
    Quit,
}

/// Commands that expose topology, block, fan out across slots, or touch
/// server-wide state.
pub const FORBIDDEN_COMMANDS: &[&str] = &[
    // Cluster and connection state
    "CLUSTER", "READONLY", "READWRITE", "AUTH", "ECHO", "SELECT",
    // HyperLogLog
    "PFADD", "PFCOUNT", "PFMERGE",
    // Keyspace
    "KEYS", "MIGRATE", "MOVE", "OBJECT", "RANDOMKEY", "RENAME", "RENAMENX", "WAIT", "SCAN",
    // Blocking and cross-key list moves
    "BLPOP", "BRPOP", "BRPOPLPUSH", "RPOPLPUSH",
    // Pub/Sub
    "PSUBSCRIBE", "PUBSUB", "PUBLISH", "PUNSUBSCRIBE", "SUBSCRIBE", "UNSUBSCRIBE",
    // Scripting
    "EVAL", "EVALSHA", "SCRIPT",
    // Server administration
    "BGREWRITEAOF", "BGSAVE", "CLIENT", "COMMAND", "CONFIG", "DBSIZE", "DEBUG", "FLUSHALL",
    "FLUSHDB", "INFO", "LASTSAVE", "MONITOR", "ROLE", "SAVE", "SHUTDOWN", "SLAVEOF", "SLOWLOG",
    "SYNC", "TIME",
    // Multi-key set operations
    "SDIFF", "SDIFFSTORE", "SINTER", "SINTERSTORE", "SMOVE", "SUNION", "SUNIONSTORE",
    "ZINTERSTORE", "ZUNIONSTORE", "BITOP",
];

/// Classify a command name. Lookup is by the trimmed, upper-cased name.
pub fn classify(name: &str) -> CommandClass {
    let name = name.trim().to_ascii_uppercase();
    match name.as_str() {
        "PING" => CommandClass::Local(LocalCommand::Ping),
        "QUIT" => CommandClass::Local(LocalCommand::Quit),
        other if FORBIDDEN_COMMANDS.contains(&other) => CommandClass::Forbidden,
        _ => CommandClass::PassThrough,
    }
}

/// Rewrite the first argument to `prefix:key`.
///
/// Argument 0 is assumed to be the key for every command; commands whose key
/// lives elsewhere (or that carry several keys) only get the first argument
/// rewritten.
pub fn prefix_key(prefix: Option<&[u8]>, args: &mut [Bytes]) {
    let (Some(prefix), Some(key)) = (prefix, args.first_mut()) else {
        return;
    };
    if prefix.is_empty() {
        return;
    }
    let mut rewritten = BytesMut::with_capacity(prefix.len() + 1 + key.len());
    rewritten.extend_from_slice(prefix);
    rewritten.extend_from_slice(b":");
    rewritten.extend_from_slice(key);
    *key = rewritten.freeze();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_commands() {
        assert_eq!(classify("PING"), CommandClass::Local(LocalCommand::Ping));
        assert_eq!(classify("ping"), CommandClass::Local(LocalCommand::Ping));
        assert_eq!(classify(" quit "), CommandClass::Local(LocalCommand::Quit));
    }

    #[test]
    fn test_forbidden_commands() {
        for name in FORBIDDEN_COMMANDS {
            assert_eq!(classify(name), CommandClass::Forbidden, "{name}");
            assert_eq!(classify(&name.to_lowercase()), CommandClass::Forbidden, "{name}");
        }
    }

    #[test]
    fn test_unknown_commands_pass_through() {
        assert_eq!(classify("GET"), CommandClass::PassThrough);
        assert_eq!(classify("NOSUCHCOMMAND"), CommandClass::PassThrough);
        assert_eq!(classify(""), CommandClass::PassThrough);
    }

    #[test]
    fn test_classify_is_stable() {
        for name in ["get", "KEYS", "Ping", "hgetall"] {
            assert_eq!(classify(name), classify(name));
            assert_eq!(classify(name), classify(&name.to_uppercase()));
        }
    }

    #[test]
    fn test_prefix_key() {
        let mut args = vec![Bytes::from_static(b"foo"), Bytes::from_static(b"bar")];
        prefix_key(Some(&b"tenant1"[..]), &mut args);
        assert_eq!(&args[0][..], b"tenant1:foo");
        assert_eq!(&args[1][..], b"bar");
    }

    #[test]
    fn test_prefix_key_binary_key() {
        let mut args = vec![Bytes::from_static(b"\0\xff")];
        prefix_key(Some(&b"t"[..]), &mut args);
        assert_eq!(&args[0][..], b"t:\0\xff");
    }

    #[test]
    fn test_prefix_key_noop() {
        let mut args = vec![Bytes::from_static(b"foo")];
        prefix_key(None, &mut args);
        prefix_key(Some(&b""[..]), &mut args);
        assert_eq!(&args[0][..], b"foo");

        let mut empty: Vec<Bytes> = Vec::new();
        prefix_key(Some(&b"tenant1"[..]), &mut empty);
        assert!(empty.is_empty());
    }
}
