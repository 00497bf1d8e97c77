//! Binary keyspace snapshots.
//!
//! The file is a flat record stream. Each record is an optional expiry
//! prefix (`0xFD` + 8-byte big-endian unix-ms deadline), a type byte (the
//! object type discriminant), the key string and the value; a single `0xFF`
//! terminates the stream. Lengths use a variable-width prefix: 6 bits
//! inline, 14 bits over two bytes, or a marker byte followed by a 32-bit
//! big-endian word.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use bytes::Bytes;
use thiserror::Error as ThisError;

use crate::db::Db;
use crate::frame::format_double;
use crate::object::{ObjType, Object};
use crate::zset::ZAddFlags;

pub const OPCODE_EXPIRETIME: u8 = 0xFD;
pub const OPCODE_EOF: u8 = 0xFF;

#[derive(Debug, ThisError)]
pub enum RdbError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("corrupt rdb: {0}")]
    Corrupt(&'static str),
}

fn write_length(w: &mut impl Write, len: usize) -> io::Result<()> {
    if len < 1 << 6 {
        w.write_all(&[len as u8])
    } else if len < 1 << 14 {
        w.write_all(&[0x40 | (len >> 8) as u8, len as u8])
    } else {
        w.write_all(&[0x80])?;
        w.write_all(&(len as u32).to_be_bytes())
    }
}

fn write_string(w: &mut impl Write, data: &[u8]) -> io::Result<()> {
    write_length(w, data.len())?;
    w.write_all(data)
}

/// Snapshot the database. The stream goes to `temp-<pid>.rdb` beside the
/// destination and is renamed over it only after a successful fsync, so a
/// torn write can never replace a good snapshot.
pub fn save(path: &str, db: &Db) -> Result<(), RdbError> {
    let target = Path::new(path);
    let tmp = target.with_file_name(format!("temp-{}.rdb", std::process::id()));
    let file = File::create(&tmp)?;
    let mut w = BufWriter::new(file);

    for (key, obj) in db.data.safe_iter() {
        if let Some(&when) = db.expire.peek(key) {
            w.write_all(&[OPCODE_EXPIRETIME])?;
            w.write_all(&(when as u64).to_be_bytes())?;
        }
        w.write_all(&[obj.obj_type().discriminant()])?;
        write_string(&mut w, key)?;
        match &**obj {
            Object::Str(_) => {
                let value = obj.str_bytes().unwrap_or_default();
                write_string(&mut w, &value)?;
            }
            Object::List(list) => {
                let list = list.borrow();
                write_length(&mut w, list.len())?;
                for element in list.iter() {
                    write_string(&mut w, element)?;
                }
            }
            Object::Set(set) => {
                let set = set.borrow();
                write_length(&mut w, set.len())?;
                for (member, _) in set.safe_iter() {
                    write_string(&mut w, member)?;
                }
            }
            Object::Hash(hash) => {
                let hash = hash.borrow();
                write_length(&mut w, hash.len())?;
                for (field, value) in hash.safe_iter() {
                    write_string(&mut w, field)?;
                    write_string(&mut w, value)?;
                }
            }
            Object::ZSet(zset) => {
                let zset = zset.borrow();
                let zsl = zset.skiplist();
                write_length(&mut w, zsl.len())?;
                let mut cursor = zsl.first_id();
                while let Some(id) = cursor {
                    let (member, score) = zsl.entry(id);
                    write_string(&mut w, member)?;
                    write_string(&mut w, format_double(score).as_bytes())?;
                    cursor = zsl.next_id(id);
                }
            }
        }
    }
    w.write_all(&[OPCODE_EOF])?;
    w.flush()?;
    w.get_ref().sync_all()?;
    std::fs::rename(&tmp, target)?;
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8, RdbError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(RdbError::Corrupt("unexpected end of stream"))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RdbError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(RdbError::Corrupt("unexpected end of stream"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn length(&mut self) -> Result<usize, RdbError> {
        let first = self.byte()?;
        match first >> 6 {
            0b00 => Ok(usize::from(first & 0x3f)),
            0b01 => {
                let second = self.byte()?;
                Ok((usize::from(first & 0x3f) << 8) | usize::from(second))
            }
            0b10 => {
                let word = self.take(4)?;
                Ok(u32::from_be_bytes([word[0], word[1], word[2], word[3]]) as usize)
            }
            _ => Err(RdbError::Corrupt("bad length prefix")),
        }
    }

    fn string(&mut self) -> Result<Bytes, RdbError> {
        let len = self.length()?;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }
}

/// Load a snapshot into a fresh database. Keys whose deadline already
/// passed are dropped on the way in.
pub fn load(path: &str, now_ms: i64) -> Result<Db, RdbError> {
    let data = std::fs::read(path)?;
    let mut r = Reader { buf: &data, pos: 0 };
    let mut db = Db::new();

    let mut expire_at: Option<i64> = None;
    loop {
        let opcode = r.byte()?;
        if opcode == OPCODE_EOF {
            break;
        }
        if opcode == OPCODE_EXPIRETIME {
            let word = r.take(8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(word);
            expire_at = Some(u64::from_be_bytes(raw) as i64);
            continue;
        }
        let obj_type =
            ObjType::from_discriminant(opcode).ok_or(RdbError::Corrupt("unknown type byte"))?;
        let key = r.string()?;
        let obj = match obj_type {
            ObjType::Str => Object::string(r.string()?),
            ObjType::List => {
                let count = r.length()?;
                let obj = Object::list();
                if let Object::List(list) = &*obj {
                    let mut list = list.borrow_mut();
                    for _ in 0..count {
                        list.push_back(r.string()?);
                    }
                }
                obj
            }
            ObjType::Set => {
                let count = r.length()?;
                let obj = Object::set();
                if let Object::Set(set) = &*obj {
                    let mut set = set.borrow_mut();
                    for _ in 0..count {
                        let _ = set.add(r.string()?, ());
                    }
                }
                obj
            }
            ObjType::Hash => {
                let count = r.length()?;
                let obj = Object::hash();
                if let Object::Hash(hash) = &*obj {
                    let mut hash = hash.borrow_mut();
                    for _ in 0..count {
                        let field = r.string()?;
                        let value = r.string()?;
                        hash.set(field, value);
                    }
                }
                obj
            }
            ObjType::ZSet => {
                let count = r.length()?;
                let obj = Object::zset();
                if let Object::ZSet(zset) = &*obj {
                    let mut zset = zset.borrow_mut();
                    for _ in 0..count {
                        let member = r.string()?;
                        let score: f64 = std::str::from_utf8(&r.string()?)
                            .ok()
                            .and_then(|s| s.parse().ok())
                            .ok_or(RdbError::Corrupt("bad zset score"))?;
                        zset.add(score, &member, ZAddFlags::default());
                    }
                }
                obj
            }
        };
        let deadline = expire_at.take();
        match deadline {
            Some(when) if when <= now_ms => {}
            Some(when) => {
                db.data.set(key.clone(), obj);
                db.set_expire(key, when);
            }
            None => {
                db.data.set(key, obj);
            }
        }
    }
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_length(len: usize) {
        let mut buf = Vec::new();
        write_length(&mut buf, len).unwrap();
        let mut r = Reader { buf: &buf, pos: 0 };
        assert_eq!(r.length().unwrap(), len);
        assert_eq!(r.pos, buf.len());
    }

    #[test]
    fn length_prefix_widths() {
        let mut buf = Vec::new();
        write_length(&mut buf, 5).unwrap();
        assert_eq!(buf, [5]);

        buf.clear();
        write_length(&mut buf, 700).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf[0] >> 6, 0b01);

        buf.clear();
        write_length(&mut buf, 100_000).unwrap();
        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], 0x80);

        for len in [0, 63, 64, 16_383, 16_384, 1 << 20] {
            roundtrip_length(len);
        }
    }

    #[test]
    fn corrupt_streams_are_rejected() {
        let mut r = Reader { buf: &[0xC0], pos: 0 };
        assert!(matches!(r.length(), Err(RdbError::Corrupt(_))));

        let mut r = Reader { buf: &[0x41], pos: 0 };
        assert!(matches!(r.length(), Err(RdbError::Corrupt(_))));

        let mut r = Reader { buf: &[5, b'a', b'b'], pos: 0 };
        assert!(matches!(r.string(), Err(RdbError::Corrupt(_))));
    }
}
