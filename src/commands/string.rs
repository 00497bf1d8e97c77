//! GET, SET and friends, plus the integer counters.

use bytes::Bytes;
use mio::Token;

use crate::frame::Frame;
use crate::object::{Object, ObjType};
use crate::reactor::now_ms;
use crate::server::Server;

use super::{lookup_typed, parse_int, NOT_AN_INTEGER};

pub fn get(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Str) else {
        return;
    };
    match found {
        Some(obj) => {
            let data = obj.str_bytes().unwrap_or_default();
            server.add_reply(token, Frame::Bulk(data));
        }
        None => server.add_reply(token, Frame::Null),
    }
}

pub fn set(server: &mut Server, token: Token, args: &[Bytes]) {
    server.db.set(args[1].clone(), Object::string(args[2].clone()));
    server.dirty += 1;
    server.add_reply(token, Frame::Simple("OK".to_string()));
}

pub fn setnx(server: &mut Server, token: Token, args: &[Bytes]) {
    if server.db.lookup_read(&args[1], now_ms()).is_some() {
        server.add_reply(token, Frame::Integer(0));
        return;
    }
    server.db.set(args[1].clone(), Object::string(args[2].clone()));
    server.dirty += 1;
    server.add_reply(token, Frame::Integer(1));
}

pub fn setex(server: &mut Server, token: Token, args: &[Bytes]) {
    let Some(seconds) = parse_int(&args[2]) else {
        server.add_reply_error(token, NOT_AN_INTEGER);
        return;
    };
    if seconds <= 0 {
        server.add_reply_error(token, "invalid expire time in SETEX");
        return;
    }
    server.db.set(args[1].clone(), Object::string(args[3].clone()));
    server.db.set_expire(args[1].clone(), now_ms() + seconds * 1000);
    server.dirty += 1;
    server.add_reply(token, Frame::Simple("OK".to_string()));
}

pub fn mget(server: &mut Server, token: Token, args: &[Bytes]) {
    let now = now_ms();
    let mut items = Vec::with_capacity(args.len() - 1);
    for key in &args[1..] {
        let item = match server.db.lookup_read(key, now) {
            Some(obj) => match obj.str_bytes() {
                Some(data) => Frame::Bulk(data),
                None => Frame::Null,
            },
            None => Frame::Null,
        };
        items.push(item);
    }
    server.add_reply(token, Frame::Array(items));
}

fn mset_generic(server: &mut Server, token: Token, args: &[Bytes], nx: bool) {
    if (args.len() - 1) % 2 != 0 {
        server.add_reply_error(token, "wrong number of arguments for 'mset' command");
        return;
    }
    let now = now_ms();
    if nx {
        let busy = args[1..]
            .chunks(2)
            .any(|pair| server.db.lookup_read(&pair[0], now).is_some());
        if busy {
            server.add_reply(token, Frame::Integer(0));
            return;
        }
    }
    let mut pairs = 0;
    for pair in args[1..].chunks(2) {
        server.db.set(pair[0].clone(), Object::string(pair[1].clone()));
        pairs += 1;
    }
    server.dirty += pairs;
    if nx {
        server.add_reply(token, Frame::Integer(1));
    } else {
        server.add_reply(token, Frame::Simple("OK".to_string()));
    }
}

pub fn mset(server: &mut Server, token: Token, args: &[Bytes]) {
    mset_generic(server, token, args, false);
}

pub fn msetnx(server: &mut Server, token: Token, args: &[Bytes]) {
    mset_generic(server, token, args, true);
}

fn incr_decr(server: &mut Server, token: Token, args: &[Bytes], delta: i64) {
    match server.db.lookup_write(&args[1], now_ms()) {
        Some(obj) => {
            if obj.obj_type() != ObjType::Str {
                server.add_reply_error(token, super::WRONGTYPE);
                return;
            }
            let Some(current) = obj.int_value() else {
                server.add_reply_error(token, NOT_AN_INTEGER);
                return;
            };
            let Some(next) = current.checked_add(delta) else {
                server.add_reply_error(token, "increment or decrement would overflow");
                return;
            };
            obj.set_int(next);
            server.dirty += 1;
            server.add_reply(token, Frame::Integer(next));
        }
        None => {
            server
                .db
                .set(args[1].clone(), Object::string_from_int(delta));
            server.dirty += 1;
            server.add_reply(token, Frame::Integer(delta));
        }
    }
}

pub fn incr(server: &mut Server, token: Token, args: &[Bytes]) {
    incr_decr(server, token, args, 1);
}

pub fn decr(server: &mut Server, token: Token, args: &[Bytes]) {
    incr_decr(server, token, args, -1);
}
