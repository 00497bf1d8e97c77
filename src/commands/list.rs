//! List commands over the linked-list payload.

use bytes::Bytes;
use mio::Token;

use crate::frame::Frame;
use crate::object::{Object, ObjType};
use crate::server::Server;

use super::{lookup_typed, parse_int, NOT_AN_INTEGER};

fn push_generic(server: &mut Server, token: Token, args: &[Bytes], front: bool) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::List) else {
        return;
    };
    let obj = match found {
        Some(obj) => obj,
        None => {
            let obj = Object::list();
            server.db.data.set(args[1].clone(), obj.clone());
            obj
        }
    };
    let Object::List(list) = &*obj else {
        return;
    };
    let length = {
        let mut list = list.borrow_mut();
        for value in &args[2..] {
            if front {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        list.len()
    };
    server.dirty += (args.len() - 2) as u64;
    server.add_reply(token, Frame::Integer(length as i64));
}

pub fn lpush(server: &mut Server, token: Token, args: &[Bytes]) {
    push_generic(server, token, args, true);
}

pub fn rpush(server: &mut Server, token: Token, args: &[Bytes]) {
    push_generic(server, token, args, false);
}

fn pop_generic(server: &mut Server, token: Token, args: &[Bytes], front: bool) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::List) else {
        return;
    };
    let Some(obj) = found else {
        server.add_reply(token, Frame::Null);
        return;
    };
    let Object::List(list) = &*obj else {
        return;
    };
    let (popped, emptied) = {
        let mut list = list.borrow_mut();
        let popped = if front { list.pop_front() } else { list.pop_back() };
        (popped, list.is_empty())
    };
    match popped {
        Some(value) => {
            if emptied {
                server.db.remove(&args[1]);
            }
            server.dirty += 1;
            server.add_reply(token, Frame::Bulk(value));
        }
        None => server.add_reply(token, Frame::Null),
    }
}

pub fn lpop(server: &mut Server, token: Token, args: &[Bytes]) {
    pop_generic(server, token, args, true);
}

pub fn rpop(server: &mut Server, token: Token, args: &[Bytes]) {
    pop_generic(server, token, args, false);
}

pub fn lrange(server: &mut Server, token: Token, args: &[Bytes]) {
    let (Some(start), Some(stop)) = (parse_int(&args[2]), parse_int(&args[3])) else {
        server.add_reply_error(token, NOT_AN_INTEGER);
        return;
    };
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::List) else {
        return;
    };
    let Some(obj) = found else {
        server.add_reply(token, Frame::Array(Vec::new()));
        return;
    };
    let Object::List(list) = &*obj else {
        return;
    };
    let items = {
        let list = list.borrow();
        let length = list.len() as i64;
        let mut start = if start < 0 { length + start } else { start };
        let mut stop = if stop < 0 { length + stop } else { stop };
        if start < 0 {
            start = 0;
        }
        if stop >= length {
            stop = length - 1;
        }
        if start >= length || stop < 0 || start > stop {
            Vec::new()
        } else {
            list.iter()
                .skip(start as usize)
                .take((stop - start + 1) as usize)
                .map(|value| Frame::Bulk(value.clone()))
                .collect()
        }
    };
    server.add_reply(token, Frame::Array(items));
}

pub fn lindex(server: &mut Server, token: Token, args: &[Bytes]) {
    let Some(index) = parse_int(&args[2]) else {
        server.add_reply_error(token, NOT_AN_INTEGER);
        return;
    };
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::List) else {
        return;
    };
    let Some(obj) = found else {
        server.add_reply(token, Frame::Null);
        return;
    };
    let Object::List(list) = &*obj else {
        return;
    };
    let item = {
        let list = list.borrow();
        let length = list.len() as i64;
        let index = if index < 0 { length + index } else { index };
        if index < 0 || index >= length {
            None
        } else {
            list.iter().nth(index as usize).cloned()
        }
    };
    match item {
        Some(value) => server.add_reply(token, Frame::Bulk(value)),
        None => server.add_reply(token, Frame::Null),
    }
}

pub fn llen(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::List) else {
        return;
    };
    let length = match found {
        Some(obj) => match &*obj {
            Object::List(list) => list.borrow().len(),
            _ => 0,
        },
        None => 0,
    };
    server.add_reply(token, Frame::Integer(length as i64));
}

/// LREM key count value: count = 0 removes every match, positive counts
/// remove from the head forward, negative from the tail backward.
pub fn lrem(server: &mut Server, token: Token, args: &[Bytes]) {
    let Some(count) = parse_int(&args[2]) else {
        server.add_reply_error(token, NOT_AN_INTEGER);
        return;
    };
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::List) else {
        return;
    };
    let Some(obj) = found else {
        server.add_reply(token, Frame::Integer(0));
        return;
    };
    let Object::List(list) = &*obj else {
        return;
    };
    let value = &args[3];
    let (removed, emptied) = {
        let mut list = list.borrow_mut();
        let limit = if count == 0 { i64::MAX } else { count.abs() };
        let mut removed = 0i64;
        if count >= 0 {
            let mut cursor = list.front_id();
            while let Some(id) = cursor {
                if removed >= limit {
                    break;
                }
                cursor = list.next_id(id);
                if list.get(id) == Some(value) {
                    list.remove(id);
                    removed += 1;
                }
            }
        } else {
            let mut cursor = list.back_id();
            while let Some(id) = cursor {
                if removed >= limit {
                    break;
                }
                cursor = list.prev_id(id);
                if list.get(id) == Some(value) {
                    list.remove(id);
                    removed += 1;
                }
            }
        }
        (removed, list.is_empty())
    };
    if emptied {
        server.db.remove(&args[1]);
    }
    server.dirty += removed as u64;
    server.add_reply(token, Frame::Integer(removed));
}
