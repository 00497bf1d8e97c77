//! Sorted-set commands.

use bytes::Bytes;
use mio::Token;

use crate::frame::Frame;
use crate::object::{Object, ObjType};
use crate::server::Server;
use crate::zset::{ZAddFlags, ZAddResult};

use super::{lookup_typed, parse_float, parse_int, NOT_AN_INTEGER, NOT_A_FLOAT};

pub fn zadd(server: &mut Server, token: Token, args: &[Bytes]) {
    zadd_generic(server, token, args, false);
}

/// ZINCRBY key increment member is ZADD INCR with a fixed argument shape.
pub fn zincrby(server: &mut Server, token: Token, args: &[Bytes]) {
    zadd_generic(server, token, args, true);
}

fn zadd_generic(server: &mut Server, token: Token, args: &[Bytes], incr_cmd: bool) {
    let mut flags = ZAddFlags {
        incr: incr_cmd,
        ..Default::default()
    };
    let mut ch = false;
    let mut idx = 2;
    if !incr_cmd {
        while idx < args.len() {
            let opt = &args[idx];
            if opt.eq_ignore_ascii_case(b"nx") {
                flags.nx = true;
            } else if opt.eq_ignore_ascii_case(b"xx") {
                flags.xx = true;
            } else if opt.eq_ignore_ascii_case(b"gt") {
                flags.gt = true;
            } else if opt.eq_ignore_ascii_case(b"lt") {
                flags.lt = true;
            } else if opt.eq_ignore_ascii_case(b"ch") {
                ch = true;
            } else if opt.eq_ignore_ascii_case(b"incr") {
                flags.incr = true;
            } else {
                break;
            }
            idx += 1;
        }
    }

    let remaining = args.len() - idx;
    if remaining == 0 || remaining % 2 != 0 {
        server.add_reply_error(token, "wrong number of arguments for 'zadd' command");
        return;
    }
    let pairs = remaining / 2;

    if flags.nx && flags.xx {
        server.add_reply_error(token, "XX and NX options at the same time are not compatible");
        return;
    }
    if (flags.gt && flags.nx) || (flags.lt && flags.nx) || (flags.gt && flags.lt) {
        server.add_reply_error(
            token,
            "GT, LT, and/or NX options at the same time are not compatible",
        );
        return;
    }
    if flags.incr && pairs > 1 {
        server.add_reply_error(token, "INCR option supports a single increment-element pair");
        return;
    }

    // Reject every syntax error before touching the set, so the command is
    // all-or-nothing.
    let mut scores = Vec::with_capacity(pairs);
    for i in 0..pairs {
        let Some(score) = parse_float(&args[idx + i * 2]) else {
            server.add_reply_error(token, NOT_A_FLOAT);
            return;
        };
        scores.push(score);
    }

    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::ZSet) else {
        return;
    };
    let obj = match found {
        Some(obj) => obj,
        None => {
            if flags.xx {
                if flags.incr {
                    server.add_reply(token, Frame::Null);
                } else {
                    server.add_reply(token, Frame::Integer(0));
                }
                return;
            }
            let obj = Object::zset();
            server.db.data.set(args[1].clone(), obj.clone());
            obj
        }
    };
    let Object::ZSet(zset) = &*obj else {
        return;
    };

    let mut added = 0i64;
    let mut updated = 0i64;
    let mut nan = false;
    let mut suppressed = false;
    let mut last_score = None;
    {
        let mut zset = zset.borrow_mut();
        for (i, score) in scores.iter().enumerate() {
            let member = &args[idx + i * 2 + 1];
            match zset.add(*score, member, flags) {
                ZAddResult::Added(score) => {
                    added += 1;
                    last_score = Some(score);
                }
                ZAddResult::Updated(score) => {
                    updated += 1;
                    last_score = Some(score);
                }
                ZAddResult::Unchanged(score) => last_score = Some(score),
                ZAddResult::Nop => suppressed = true,
                ZAddResult::Nan => nan = true,
            }
        }
    }
    server.dirty += (added + updated) as u64;

    if flags.incr {
        if nan {
            server.add_reply_error(token, "resulting score is not a number (NaN)");
        } else if suppressed {
            server.add_reply(token, Frame::Null);
        } else if let Some(score) = last_score {
            server.add_reply(token, Frame::bulk_double(score));
        } else {
            server.add_reply(token, Frame::Null);
        }
    } else if ch {
        server.add_reply(token, Frame::Integer(added + updated));
    } else {
        server.add_reply(token, Frame::Integer(added));
    }
}

pub fn zrem(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::ZSet) else {
        return;
    };
    let Some(obj) = found else {
        server.add_reply(token, Frame::Integer(0));
        return;
    };
    let Object::ZSet(zset) = &*obj else {
        return;
    };
    let (removed, emptied) = {
        let mut zset = zset.borrow_mut();
        let mut removed = 0i64;
        for member in &args[2..] {
            if zset.remove(member) {
                removed += 1;
            }
        }
        (removed, zset.is_empty())
    };
    if emptied {
        server.db.remove(&args[1]);
    }
    server.dirty += removed as u64;
    server.add_reply(token, Frame::Integer(removed));
}

pub fn zscore(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::ZSet) else {
        return;
    };
    let score = match found {
        Some(obj) => match &*obj {
            Object::ZSet(zset) => zset.borrow_mut().score(&args[2]),
            _ => None,
        },
        None => None,
    };
    match score {
        Some(score) => server.add_reply(token, Frame::bulk_double(score)),
        None => server.add_reply(token, Frame::Null),
    }
}

pub fn zcard(server: &mut Server, token: Token, args: &[Bytes]) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::ZSet) else {
        return;
    };
    let cardinality = match found {
        Some(obj) => match &*obj {
            Object::ZSet(zset) => zset.borrow().len(),
            _ => 0,
        },
        None => 0,
    };
    server.add_reply(token, Frame::Integer(cardinality as i64));
}

fn zrank_generic(server: &mut Server, token: Token, args: &[Bytes], reverse: bool) {
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::ZSet) else {
        return;
    };
    let rank = match found {
        Some(obj) => match &*obj {
            Object::ZSet(zset) => zset.borrow_mut().rank(&args[2], reverse),
            _ => None,
        },
        None => None,
    };
    match rank {
        Some(rank) => server.add_reply(token, Frame::Integer(rank as i64)),
        None => server.add_reply(token, Frame::Null),
    }
}

pub fn zrank(server: &mut Server, token: Token, args: &[Bytes]) {
    zrank_generic(server, token, args, false);
}

pub fn zrevrank(server: &mut Server, token: Token, args: &[Bytes]) {
    zrank_generic(server, token, args, true);
}

fn zpop_generic(server: &mut Server, token: Token, args: &[Bytes], max: bool) {
    let mut count = 1i64;
    if args.len() > 2 {
        match parse_int(&args[2]) {
            Some(n) => count = if n < 0 { 1 } else { n },
            None => {
                server.add_reply_error(token, NOT_AN_INTEGER);
                return;
            }
        }
    }
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::ZSet) else {
        return;
    };
    let Some(obj) = found else {
        server.add_reply(token, Frame::Array(Vec::new()));
        return;
    };
    let Object::ZSet(zset) = &*obj else {
        return;
    };
    let (items, popped, emptied) = {
        let mut zset = zset.borrow_mut();
        let mut items = Vec::new();
        let mut popped = 0u64;
        for _ in 0..count {
            let Some((member, score)) = (if max { zset.pop_max() } else { zset.pop_min() })
            else {
                break;
            };
            items.push(Frame::Bulk(member));
            items.push(Frame::bulk_double(score));
            popped += 1;
        }
        (items, popped, zset.is_empty())
    };
    if emptied {
        server.db.remove(&args[1]);
    }
    server.dirty += popped;
    server.add_reply(token, Frame::Array(items));
}

pub fn zpopmin(server: &mut Server, token: Token, args: &[Bytes]) {
    zpop_generic(server, token, args, false);
}

pub fn zpopmax(server: &mut Server, token: Token, args: &[Bytes]) {
    zpop_generic(server, token, args, true);
}

fn withscores_flag(server: &mut Server, token: Token, args: &[Bytes]) -> Result<bool, ()> {
    match args.len() {
        4 => Ok(false),
        5 if args[4].eq_ignore_ascii_case(b"withscores") => Ok(true),
        _ => {
            server.add_reply_error(token, "syntax error");
            Err(())
        }
    }
}

fn zrange_generic(server: &mut Server, token: Token, args: &[Bytes], reverse: bool) {
    let (Some(start), Some(stop)) = (parse_int(&args[2]), parse_int(&args[3])) else {
        server.add_reply_error(token, NOT_AN_INTEGER);
        return;
    };
    let Ok(withscores) = withscores_flag(server, token, args) else {
        return;
    };
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::ZSet) else {
        return;
    };
    let Some(obj) = found else {
        server.add_reply(token, Frame::Array(Vec::new()));
        return;
    };
    let Object::ZSet(zset) = &*obj else {
        return;
    };
    let items = {
        let zset = zset.borrow();
        let zsl = zset.skiplist();
        let length = zsl.len() as i64;
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
            // 1-based rank of the first reply element.
            let first_rank = if reverse { length - start } else { start + 1 };
            let mut items = Vec::new();
            let mut cursor = zsl.id_by_rank(first_rank as usize);
            for _ in start..=stop {
                let Some(id) = cursor else {
                    break;
                };
                let (member, score) = zsl.entry(id);
                items.push(Frame::Bulk(member.clone()));
                if withscores {
                    items.push(Frame::bulk_double(score));
                }
                cursor = if reverse { zsl.prev_id(id) } else { zsl.next_id(id) };
            }
            items
        }
    };
    server.add_reply(token, Frame::Array(items));
}

pub fn zrange(server: &mut Server, token: Token, args: &[Bytes]) {
    zrange_generic(server, token, args, false);
}

pub fn zrevrange(server: &mut Server, token: Token, args: &[Bytes]) {
    zrange_generic(server, token, args, true);
}

fn zrangebyscore_generic(server: &mut Server, token: Token, args: &[Bytes], reverse: bool) {
    // The reverse variant takes (max, min), the forward variant (min, max).
    let (first, second) = (parse_float(&args[2]), parse_float(&args[3]));
    let (Some(first), Some(second)) = (first, second) else {
        server.add_reply_error(token, NOT_A_FLOAT);
        return;
    };
    let (min, max) = if reverse { (second, first) } else { (first, second) };
    let Ok(withscores) = withscores_flag(server, token, args) else {
        return;
    };
    let Ok(found) = lookup_typed(server, token, &args[1], ObjType::ZSet) else {
        return;
    };
    let Some(obj) = found else {
        server.add_reply(token, Frame::Array(Vec::new()));
        return;
    };
    let Object::ZSet(zset) = &*obj else {
        return;
    };
    let items = {
        let zset = zset.borrow();
        let zsl = zset.skiplist();
        let mut items = Vec::new();
        if reverse {
            let mut cursor = zsl.last_in_range(max);
            while let Some(id) = cursor {
                let (member, score) = zsl.entry(id);
                if score < min {
                    break;
                }
                items.push(Frame::Bulk(member.clone()));
                if withscores {
                    items.push(Frame::bulk_double(score));
                }
                cursor = zsl.prev_id(id);
            }
        } else {
            let mut cursor = zsl.first_in_range(min);
            while let Some(id) = cursor {
                let (member, score) = zsl.entry(id);
                if score > max {
                    break;
                }
                items.push(Frame::Bulk(member.clone()));
                if withscores {
                    items.push(Frame::bulk_double(score));
                }
                cursor = zsl.next_id(id);
            }
        }
        items
    };
    server.add_reply(token, Frame::Array(items));
}

pub fn zrangebyscore(server: &mut Server, token: Token, args: &[Bytes]) {
    zrangebyscore_generic(server, token, args, false);
}

pub fn zrevrangebyscore(server: &mut Server, token: Token, args: &[Bytes]) {
    zrangebyscore_generic(server, token, args, true);
}
