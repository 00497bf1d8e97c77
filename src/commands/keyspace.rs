//! Key lifecycle: DEL, EXPIRE/EXPIREAT and KEYS.

use bytes::Bytes;
use glob_match::glob_match;
use mio::Token;

use crate::frame::Frame;
use crate::reactor::now_ms;
use crate::server::Server;

use super::{parse_int, NOT_AN_INTEGER};

pub fn del(server: &mut Server, token: Token, args: &[Bytes]) {
    let now = now_ms();
    let mut deleted = 0u64;
    for key in &args[1..] {
        // An already-expired key must not count as deleted.
        server.db.expire_if_needed(key, now);
        if server.db.remove(key) {
            deleted += 1;
        }
    }
    server.dirty += deleted;
    server.add_reply(token, Frame::Integer(deleted as i64));
}

pub fn expire(server: &mut Server, token: Token, args: &[Bytes]) {
    let now = now_ms();
    if server.db.lookup_write(&args[1], now).is_none() {
        server.add_reply(token, Frame::Integer(0));
        return;
    }
    let Some(seconds) = parse_int(&args[2]) else {
        server.add_reply_error(token, NOT_AN_INTEGER);
        return;
    };
    server
        .db
        .set_expire(args[1].clone(), now + seconds.saturating_mul(1000));
    server.dirty += 1;
    server.add_reply(token, Frame::Integer(1));
}

/// EXPIREAT key <unix-ms>. The deadline unit matches the expiry index, so
/// rewritten logs replay byte-for-byte.
pub fn expireat(server: &mut Server, token: Token, args: &[Bytes]) {
    let now = now_ms();
    if server.db.lookup_write(&args[1], now).is_none() {
        server.add_reply(token, Frame::Integer(0));
        return;
    }
    let Some(when) = parse_int(&args[2]) else {
        server.add_reply_error(token, NOT_AN_INTEGER);
        return;
    };
    server.db.set_expire(args[1].clone(), when);
    server.dirty += 1;
    server.add_reply(token, Frame::Integer(1));
}

pub fn keys(server: &mut Server, token: Token, args: &[Bytes]) {
    let pattern = String::from_utf8_lossy(&args[1]).into_owned();
    let mut items = Vec::new();
    for (key, _) in server.db.data.iter() {
        let name = String::from_utf8_lossy(key);
        if glob_match(&pattern, &name) {
            items.push(Frame::Bulk(key.clone()));
        }
    }
    server.add_reply(token, Frame::Array(items));
}
