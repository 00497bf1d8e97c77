//! Hash commands over the field table payload.

use bytes::Bytes;
use mio::Token;

use crate::frame::Frame;
use crate::object::{Object, ObjType};
use crate::server::Server;

use super::lookup_typed;

pub fn hset(server: &mut Server, token: Token, args: &[Bytes]) {
    if args.len() % 2 != 0 {
        server.add_reply_error(token, "wrong number of arguments for 'hset' command");
        return;
    }
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Hash) else {
        return;
    };
    let obj = match found {
        Some(obj) => obj,
        None => {
            let obj = Object::hash();
            server.db.data.set(args[1].clone(), obj.clone());
            obj
        }
    };
    let Object::Hash(hash) = &*obj else {
        return;
    };
    let (created, pairs) = {
        let mut hash = hash.borrow_mut();
        let mut created = 0i64;
        let mut pairs = 0u64;
        for pair in args[2..].chunks(2) {
            if hash.add(pair[0].clone(), pair[1].clone()).is_ok() {
                created += 1;
            } else if let Some(slot) = hash.get_mut(&pair[0]) {
                *slot = pair[1].clone();
            }
            pairs += 1;
        }
        (created, pairs)
    };
    server.dirty += pairs;
    server.add_reply(token, Frame::Integer(created));
}

pub fn hsetnx(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Hash) else {
        return;
    };
    let obj = match found {
        Some(obj) => obj,
        None => {
            let obj = Object::hash();
            server.db.data.set(args[1].clone(), obj.clone());
            obj
        }
    };
    let Object::Hash(hash) = &*obj else {
        return;
    };
    let created = hash.borrow_mut().add(args[2].clone(), args[3].clone()).is_ok();
    if created {
        server.dirty += 1;
    }
    server.add_reply(token, Frame::Integer(i64::from(created)));
}

pub fn hget(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Hash) else {
        return;
    };
    let value = match found {
        Some(obj) => match &*obj {
            Object::Hash(hash) => hash.borrow_mut().get(&args[2]).cloned(),
            _ => None,
        },
        None => None,
    };
    match value {
        Some(value) => server.add_reply(token, Frame::Bulk(value)),
        None => server.add_reply(token, Frame::Null),
    }
}

pub fn hdel(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Hash) else {
        return;
    };
    let Some(obj) = found else {
        server.add_reply(token, Frame::Integer(0));
        return;
    };
    let Object::Hash(hash) = &*obj else {
        return;
    };
    let (deleted, emptied) = {
        let mut hash = hash.borrow_mut();
        let mut deleted = 0i64;
        for field in &args[2..] {
            if hash.remove(field).is_ok() {
                deleted += 1;
            }
        }
        (deleted, hash.is_empty())
    };
    if emptied {
        server.db.remove(&args[1]);
    }
    server.dirty += deleted as u64;
    server.add_reply(token, Frame::Integer(deleted));
}

fn fields_generic(server: &mut Server, token: Token, args: &[Bytes], keys: bool) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Hash) else {
        return;
    };
    let items = match found {
        Some(obj) => match &*obj {
            Object::Hash(hash) => hash
                .borrow()
                .iter()
                .map(|(field, value)| {
                    Frame::Bulk(if keys { field.clone() } else { value.clone() })
                })
                .collect(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    };
    server.add_reply(token, Frame::Array(items));
}

pub fn hkeys(server: &mut Server, token: Token, args: &[Bytes]) {
    fields_generic(server, token, args, true);
}

pub fn hvals(server: &mut Server, token: Token, args: &[Bytes]) {
    fields_generic(server, token, args, false);
}
