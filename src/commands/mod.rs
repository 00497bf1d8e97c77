//! The command table and shared argument plumbing.
//!
//! Each entry carries the command name, its handler, an arity (negative
//! means "at least that many arguments, verb included") and whether the
//! command mutates the keyspace, which drives dirty accounting and AOF
//! propagation.

pub mod hash;
pub mod keyspace;
pub mod list;
pub mod server;
pub mod set;
pub mod string;
pub mod zset;

use bytes::Bytes;
use mio::Token;

use crate::object::{ObjType, Robj};
use crate::reactor::now_ms;
use crate::server::Server;

pub type CommandProc = fn(&mut Server, Token, &[Bytes]);

pub struct CommandSpec {
    pub name: &'static str,
    pub proc: CommandProc,
    pub arity: i32,
    pub write: bool,
}

pub static COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec { name: "expireat", proc: keyspace::expireat, arity: 3, write: true },
    CommandSpec { name: "expire", proc: keyspace::expire, arity: 3, write: true },
    CommandSpec { name: "del", proc: keyspace::del, arity: -2, write: true },
    CommandSpec { name: "keys", proc: keyspace::keys, arity: 2, write: false },
    // string
    CommandSpec { name: "get", proc: string::get, arity: 2, write: false },
    CommandSpec { name: "set", proc: string::set, arity: 3, write: true },
    CommandSpec { name: "mget", proc: string::mget, arity: -2, write: false },
    CommandSpec { name: "mset", proc: string::mset, arity: -3, write: true },
    CommandSpec { name: "msetnx", proc: string::msetnx, arity: -3, write: true },
    CommandSpec { name: "setnx", proc: string::setnx, arity: 3, write: true },
    CommandSpec { name: "setex", proc: string::setex, arity: 4, write: true },
    CommandSpec { name: "incr", proc: string::incr, arity: 2, write: true },
    CommandSpec { name: "decr", proc: string::decr, arity: 2, write: true },
    // list
    CommandSpec { name: "rpush", proc: list::rpush, arity: -3, write: true },
    CommandSpec { name: "lpush", proc: list::lpush, arity: -3, write: true },
    CommandSpec { name: "rpop", proc: list::rpop, arity: 2, write: true },
    CommandSpec { name: "lpop", proc: list::lpop, arity: 2, write: true },
    CommandSpec { name: "lrange", proc: list::lrange, arity: 4, write: false },
    CommandSpec { name: "lindex", proc: list::lindex, arity: 3, write: false },
    CommandSpec { name: "llen", proc: list::llen, arity: 2, write: false },
    CommandSpec { name: "lrem", proc: list::lrem, arity: 4, write: true },
    // set
    CommandSpec { name: "sadd", proc: set::sadd, arity: -3, write: true },
    CommandSpec { name: "srem", proc: set::srem, arity: -3, write: true },
    CommandSpec { name: "sismember", proc: set::sismember, arity: 3, write: false },
    CommandSpec { name: "smembers", proc: set::smembers, arity: 2, write: false },
    CommandSpec { name: "scard", proc: set::scard, arity: 2, write: false },
    // hash
    CommandSpec { name: "hset", proc: hash::hset, arity: -4, write: true },
    CommandSpec { name: "hsetnx", proc: hash::hsetnx, arity: 4, write: true },
    CommandSpec { name: "hkeys", proc: hash::hkeys, arity: 2, write: false },
    CommandSpec { name: "hvals", proc: hash::hvals, arity: 2, write: false },
    CommandSpec { name: "hget", proc: hash::hget, arity: 3, write: false },
    CommandSpec { name: "hdel", proc: hash::hdel, arity: -3, write: true },
    // zset
    CommandSpec { name: "zadd", proc: zset::zadd, arity: -4, write: true },
    CommandSpec { name: "zincrby", proc: zset::zincrby, arity: 4, write: true },
    CommandSpec { name: "zrem", proc: zset::zrem, arity: -3, write: true },
    CommandSpec { name: "zscore", proc: zset::zscore, arity: 3, write: false },
    CommandSpec { name: "zcard", proc: zset::zcard, arity: 2, write: false },
    CommandSpec { name: "zrank", proc: zset::zrank, arity: 3, write: false },
    CommandSpec { name: "zrevrank", proc: zset::zrevrank, arity: 3, write: false },
    CommandSpec { name: "zpopmin", proc: zset::zpopmin, arity: -2, write: true },
    CommandSpec { name: "zpopmax", proc: zset::zpopmax, arity: -2, write: true },
    CommandSpec { name: "zrange", proc: zset::zrange, arity: -4, write: false },
    CommandSpec { name: "zrevrange", proc: zset::zrevrange, arity: -4, write: false },
    CommandSpec { name: "zrangebyscore", proc: zset::zrangebyscore, arity: -4, write: false },
    CommandSpec { name: "zrevrangebyscore", proc: zset::zrevrangebyscore, arity: -4, write: false },
    // persistence
    CommandSpec { name: "save", proc: server::save, arity: 1, write: false },
    CommandSpec { name: "bgsave", proc: server::bgsave, arity: 1, write: false },
    CommandSpec { name: "bgrewriteaof", proc: server::bgrewriteaof, arity: 1, write: false },
    // introspection, benchmark compatibility
    CommandSpec { name: "info", proc: server::info, arity: -1, write: false },
    CommandSpec { name: "hello", proc: server::hello, arity: -1, write: false },
    CommandSpec { name: "config", proc: server::config, arity: -2, write: false },
    CommandSpec { name: "ping", proc: server::ping, arity: -1, write: false },
];

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|cmd| cmd.name == name)
}

pub(crate) const WRONGTYPE: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";
pub(crate) const NOT_AN_INTEGER: &str = "value is not a valid integer";
pub(crate) const NOT_A_FLOAT: &str = "value is not a valid float";

pub(crate) fn parse_int(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

pub(crate) fn parse_float(arg: &[u8]) -> Option<f64> {
    std::str::from_utf8(arg)
        .ok()?
        .parse::<f64>()
        .ok()
        .filter(|value| !value.is_nan())
}

/// Fetch a key expecting a type. `Err` means a WRONGTYPE reply has already
/// been queued; `Ok(None)` means the key is absent (or expired).
pub(crate) fn lookup_typed(
    server: &mut Server,
    token: Token,
    key: &[u8],
    expected: ObjType,
) -> Result<Option<Robj>, ()> {
    match server.db.lookup_write(key, now_ms()) {
        None => Ok(None),
        Some(obj) if obj.obj_type() == expected => Ok(Some(obj)),
        Some(_) => {
            server.add_reply_error(token, WRONGTYPE);
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_sensitive_lowercase() {
        assert!(lookup("get").is_some());
        assert!(lookup("GET").is_none());
        assert!(lookup("flushall").is_none());
    }

    #[test]
    fn arity_signs_match_redis_shape() {
        assert_eq!(lookup("set").unwrap().arity, 3);
        assert_eq!(lookup("mset").unwrap().arity, -3);
        assert_eq!(lookup("zadd").unwrap().arity, -4);
        assert!(lookup("del").unwrap().write);
        assert!(!lookup("lrange").unwrap().write);
    }

    #[test]
    fn numeric_argument_parsing() {
        assert_eq!(parse_int(b"42"), Some(42));
        assert_eq!(parse_int(b"-1"), Some(-1));
        assert_eq!(parse_int(b"1.5"), None);
        assert_eq!(parse_int(b"abc"), None);

        assert_eq!(parse_float(b"1.5"), Some(1.5));
        assert_eq!(parse_float(b"inf"), Some(f64::INFINITY));
        assert_eq!(parse_float(b"nan"), None);
        assert_eq!(parse_float(b"abc"), None);
    }
}
