//! Maps a backend reply onto the wire shape a client expects for the command
//! that produced it.

use crate::cluster::Value;
use crate::error::{ProxyError, ProxyResult};
use crate::resp::RespValue;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Wire shape of a command's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Status,
    Integer,
    Bulk,
    MultiBulk,
    /// `*2` of a cursor bulk and a multi-bulk page.
    ScanPair,
    /// Bulk, multi-bulk or integer depending on what the backend returned.
    Polymorphic,
}

/// Command reference: every command the proxy knows how to answer.
pub const SHAPE_TABLE: &[(&str, Shape)] = &[
    ("HMSET", Shape::Status),
    ("LSET", Shape::Status),
    ("PING", Shape::Status),
    ("LTRIM", Shape::Status),
    ("MSET", Shape::Status),
    ("PFMERGE", Shape::Status),
    ("PSETEX", Shape::Status),
    ("RENAME", Shape::Status),
    ("RESTORE", Shape::Status),
    ("SET", Shape::Status),
    ("SETEX", Shape::Status),
    ("TYPE", Shape::Status),
    ("HINCRBYFLOAT", Shape::Bulk),
    ("INCRBYFLOAT", Shape::Bulk),
    ("ZINCRBY", Shape::Bulk),
    ("ZSCORE", Shape::Bulk),
    ("BRPOPLPUSH", Shape::Bulk),
    ("ECHO", Shape::Bulk),
    ("GET", Shape::Bulk),
    ("GETRANGE", Shape::Bulk),
    ("GETSET", Shape::Bulk),
    ("HGET", Shape::Bulk),
    ("LINDEX", Shape::Bulk),
    ("LPOP", Shape::Bulk),
    ("OBJECTENCODING", Shape::Bulk),
    ("RPOP", Shape::Bulk),
    ("RPOPLPUSH", Shape::Bulk),
    ("DUMP", Shape::Bulk),
    ("SUBSTR", Shape::Bulk),
    ("BLPOP", Shape::MultiBulk),
    ("BRPOP", Shape::MultiBulk),
    ("HGETALL", Shape::MultiBulk),
    ("HKEYS", Shape::MultiBulk),
    ("HMGET", Shape::MultiBulk),
    ("HVALS", Shape::MultiBulk),
    ("KEYS", Shape::MultiBulk),
    ("LRANGE", Shape::MultiBulk),
    ("MGET", Shape::MultiBulk),
    ("SDIFF", Shape::MultiBulk),
    ("SINTER", Shape::MultiBulk),
    ("SMEMBERS", Shape::MultiBulk),
    ("SUNION", Shape::MultiBulk),
    ("ZRANGE", Shape::MultiBulk),
    ("ZRANGEBYLEX", Shape::MultiBulk),
    ("ZRANGEBYSCORE", Shape::MultiBulk),
    ("ZREVRANGE", Shape::MultiBulk),
    ("ZREVRANGEBYLEX", Shape::MultiBulk),
    ("ZREVRANGEBYSCORE", Shape::MultiBulk),
    ("APPEND", Shape::Integer),
    ("BITCOUNT", Shape::Integer),
    ("BITOP", Shape::Integer),
    ("BITPOS", Shape::Integer),
    ("CLUSTERCOUNTKEYSINSLOT", Shape::Integer),
    ("CLUSTERKEYSLOT", Shape::Integer),
    ("DECR", Shape::Integer),
    ("DECRBY", Shape::Integer),
    ("DEL", Shape::Integer),
    ("EXISTS", Shape::Integer),
    ("EXPIRE", Shape::Integer),
    ("EXPIREAT", Shape::Integer),
    ("GETBIT", Shape::Integer),
    ("HDEL", Shape::Integer),
    ("HEXISTS", Shape::Integer),
    ("HINCRBY", Shape::Integer),
    ("HLEN", Shape::Integer),
    ("HSET", Shape::Integer),
    ("HSETNX", Shape::Integer),
    ("INCR", Shape::Integer),
    ("INCRBY", Shape::Integer),
    ("LINSERT", Shape::Integer),
    ("LLEN", Shape::Integer),
    ("LPUSH", Shape::Integer),
    ("LPUSHX", Shape::Integer),
    ("LREM", Shape::Integer),
    ("MOVE", Shape::Integer),
    ("MSETNX", Shape::Integer),
    ("OBJECTIDLETIME", Shape::Integer),
    ("OBJECTREFCOUNT", Shape::Integer),
    ("PERSIST", Shape::Integer),
    ("PEXPIRE", Shape::Integer),
    ("PEXPIREAT", Shape::Integer),
    ("PFADD", Shape::Integer),
    ("PFCOUNT", Shape::Integer),
    ("PTTL", Shape::Integer),
    ("PUBLISH", Shape::Integer),
    ("PUBSUBNUMPAT", Shape::Integer),
    ("RENAMENX", Shape::Integer),
    ("RPUSH", Shape::Integer),
    ("RPUSHX", Shape::Integer),
    ("SADD", Shape::Integer),
    ("SCARD", Shape::Integer),
    ("SDIFFSTORE", Shape::Integer),
    ("SENTINELRESET", Shape::Integer),
    ("SETBIT", Shape::Integer),
    ("SETNX", Shape::Integer),
    ("SETRANGE", Shape::Integer),
    ("SINTERSTORE", Shape::Integer),
    ("SISMEMBER", Shape::Integer),
    ("SMOVE", Shape::Integer),
    ("SREM", Shape::Integer),
    ("STRLEN", Shape::Integer),
    ("SUNIONSTORE", Shape::Integer),
    ("TTL", Shape::Integer),
    ("WAITREPLICAS", Shape::Integer),
    ("ZADD", Shape::Integer),
    ("ZCARD", Shape::Integer),
    ("ZCOUNT", Shape::Integer),
    ("ZINTERSTORE", Shape::Integer),
    ("ZLEXCOUNT", Shape::Integer),
    ("ZRANK", Shape::Integer),
    ("ZREM", Shape::Integer),
    ("ZREMRANGEBYLEX", Shape::Integer),
    ("ZREMRANGEBYRANK", Shape::Integer),
    ("ZREMRANGEBYSCORE", Shape::Integer),
    ("ZREVRANK", Shape::Integer),
    ("ZUNIONSTORE", Shape::Integer),
    ("HSCAN", Shape::ScanPair),
    ("SSCAN", Shape::ScanPair),
    ("ZSCAN", Shape::ScanPair),
    ("SPOP", Shape::Polymorphic),
    ("SRANDMEMBER", Shape::Polymorphic),
    ("SORT", Shape::Polymorphic),
];

static SHAPES: Lazy<HashMap<&'static str, Shape>> =
    Lazy::new(|| SHAPE_TABLE.iter().copied().collect());

/// Reply shape for an upper-cased command name.
pub fn shape_of(command: &str) -> Option<Shape> {
    SHAPES.get(command).copied()
}

/// Build the reply for one forwarded command.
///
/// `Ok` always carries a complete reply, including error lines for backend
/// and unsupported-command failures. `Err(ShapeMismatch)` means the backend
/// returned a value the command's shape cannot carry; nothing has been
/// produced for the client yet.
pub fn encode(command: &str, result: ProxyResult<Value>) -> ProxyResult<RespValue> {
    let value = match result {
        Ok(value) => value,
        Err(e) => return Ok(RespValue::error(e.to_resp_error())),
    };
    match value {
        Value::Nil => return Ok(RespValue::null_bulk_string()),
        Value::Error(msg) => return Ok(RespValue::error(msg)),
        _ => {}
    }
    let Some(shape) = shape_of(command) else {
        return Ok(RespValue::error(
            ProxyError::UnsupportedCommand(command.to_string()).to_resp_error(),
        ));
    };
    let mismatch = |found: &Value| ProxyError::ShapeMismatch {
        command: command.to_string(),
        found: found.kind(),
    };

    match (shape, value) {
        (Shape::Status, Value::Status(s)) => Ok(RespValue::SimpleString(s)),
        (Shape::Integer, Value::Int(n)) => Ok(RespValue::Integer(n)),
        (Shape::Bulk, value) => bulk(value).map_err(|v| mismatch(&v)),
        (Shape::MultiBulk, value) => multi_bulk(value).map_err(|v| mismatch(&v)),
        (Shape::ScanPair, Value::Array(mut pair)) if pair.len() == 2 => {
            let page = pair.pop().unwrap_or(Value::Nil);
            let cursor = pair.pop().unwrap_or(Value::Nil);
            let cursor = bulk(cursor).map_err(|v| mismatch(&v))?;
            let page = multi_bulk(page).map_err(|v| mismatch(&v))?;
            Ok(RespValue::array(vec![cursor, page]))
        }
        (Shape::Polymorphic, Value::Int(n)) => Ok(RespValue::Integer(n)),
        (Shape::Polymorphic, value @ Value::Bulk(_)) => bulk(value).map_err(|v| mismatch(&v)),
        (Shape::Polymorphic, value) => multi_bulk(value).map_err(|v| mismatch(&v)),
        (_, value) => Err(mismatch(&value)),
    }
}

/// A bulk reply. Nil becomes the null bulk; anything else is handed back.
fn bulk(value: Value) -> Result<RespValue, Value> {
    match value {
        Value::Bulk(data) => Ok(RespValue::BulkString(Some(data))),
        Value::Nil => Ok(RespValue::null_bulk_string()),
        other => Err(other),
    }
}

/// An array of bulk replies, nested nils becoming null bulks.
fn multi_bulk(value: Value) -> Result<RespValue, Value> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(bulk)
            .collect::<Result<Vec<_>, _>>()
            .map(RespValue::array),
        other => Err(other),
    }
}
