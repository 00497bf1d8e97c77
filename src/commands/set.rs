//! Set commands over the hash-table payload.

use bytes::Bytes;
use mio::Token;

use crate::frame::Frame;
use crate::object::{Object, ObjType};
use crate::server::Server;

use super::lookup_typed;

pub fn sadd(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Set) else {
        return;
    };
    let obj = match found {
        Some(obj) => obj,
        None => {
            let obj = Object::set();
            server.db.data.set(args[1].clone(), obj.clone());
            obj
        }
    };
    let Object::Set(set) = &*obj else {
        return;
    };
    let added = {
        let mut set = set.borrow_mut();
        let mut added = 0i64;
        for member in &args[2..] {
            if set.add(member.clone(), ()).is_ok() {
                added += 1;
            }
        }
        added
    };
    server.dirty += added as u64;
    server.add_reply(token, Frame::Integer(added));
}

pub fn srem(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Set) else {
        return;
    };
    let Some(obj) = found else {
        server.add_reply(token, Frame::Integer(0));
        return;
    };
    let Object::Set(set) = &*obj else {
        return;
    };
    let (removed, emptied) = {
        let mut set = set.borrow_mut();
        let mut removed = 0i64;
        for member in &args[2..] {
            if set.remove(member).is_ok() {
                removed += 1;
            }
        }
        (removed, set.is_empty())
    };
    if emptied {
        server.db.remove(&args[1]);
    }
    server.dirty += removed as u64;
    server.add_reply(token, Frame::Integer(removed));
}

pub fn sismember(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Set) else {
        return;
    };
    let is_member = match found {
        Some(obj) => match &*obj {
            Object::Set(set) => set.borrow_mut().contains(&args[2]),
            _ => false,
        },
        None => false,
    };
    server.add_reply(token, Frame::Integer(i64::from(is_member)));
}

pub fn smembers(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Set) else {
        return;
    };
    let items = match found {
        Some(obj) => match &*obj {
            Object::Set(set) => set
                .borrow()
                .iter()
                .map(|(member, _)| Frame::Bulk(member.clone()))
                .collect(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    };
    server.add_reply(token, Frame::Array(items));
}

pub fn scard(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::Set) else {
        return;
    };
    let cardinality = match found {
        Some(obj) => match &*obj {
            Object::Set(set) => set.borrow().len(),
            _ => 0,
        },
        None => 0,
    };
    server.add_reply(token, Frame::Integer(cardinality as i64));
}
