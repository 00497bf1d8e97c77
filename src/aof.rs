//! Append-only file: a RESP log of executed write commands.
//!
//! Commands are serialized into an in-memory buffer as they execute; the
//! buffer reaches disk according to the fsync policy. A rewrite compacts the
//! log into the minimal command sequence that rebuilds the current database,
//! written to a temp file and renamed into place so a partial rewrite can
//! never replace the live log.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{error, info};

use crate::config::{Config, FsyncPolicy};
use crate::db::Db;
use crate::frame::format_double;
use crate::object::Object;
use crate::reactor::now_ms;

/// Container items emitted per rebuilt command during a rewrite.
pub const REWRITE_ITEMS_PER_CMD: usize = 64;

pub struct Aof {
    pub enabled: bool,
    path: PathBuf,
    policy: FsyncPolicy,
    buf: Vec<u8>,
    file: Option<File>,
    pub last_fsync_ms: i64,
}

impl Aof {
    pub fn new(config: &Config) -> Aof {
        Aof {
            enabled: config.appendonly,
            path: PathBuf::from(&config.appendfilename),
            policy: config.appendfsync,
            buf: Vec::new(),
            file: None,
            last_fsync_ms: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> FsyncPolicy {
        self.policy
    }

    /// Serialize an executed command into the buffer. Under the `always`
    /// policy the buffer is flushed immediately.
    pub fn feed(&mut self, args: &[Bytes]) {
        if !self.enabled {
            return;
        }
        append_command(&mut self.buf, args);
        if self.policy == FsyncPolicy::Always {
            self.flush();
        }
    }

    /// Write the buffer out and fsync. I/O failures are logged and the
    /// server keeps running; the buffer is retained for the next attempt.
    pub fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        if self.file.is_none() {
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(file) => self.file = Some(file),
                Err(e) => {
                    error!("error opening append only file: {e}");
                    return;
                }
            }
        }
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(e) = file.write_all(&self.buf) {
            error!("error writing to append only file: {e}");
            return;
        }
        if self.policy != FsyncPolicy::No {
            if let Err(e) = file.sync_all() {
                error!("error syncing append only file: {e}");
            }
        }
        self.buf.clear();
        self.last_fsync_ms = now_ms();
    }

    /// Compact the log: write the minimal rebuild sequence for the current
    /// database to a temp file, fsync, and rename it over the live file.
    pub fn rewrite(&mut self, db: &Db) -> io::Result<()> {
        self.flush();
        // Keep the temp file next to the target so the rename is atomic.
        let tmp = self
            .path
            .with_file_name(format!("temp-rewriteaof-bg-{}.aof", std::process::id()));
        let file = File::create(&tmp)?;
        let mut w = BufWriter::new(file);

        for (key, obj) in db.data.safe_iter() {
            match &**obj {
                Object::Str(_) => {
                    let value = obj.str_bytes().unwrap_or_default();
                    write_command(&mut w, &[b"SET", key.as_ref(), value.as_ref()])?;
                }
                Object::List(list) => {
                    let list = list.borrow();
                    let elements: Vec<&Bytes> = list.iter().collect();
                    for chunk in elements.chunks(REWRITE_ITEMS_PER_CMD) {
                        let mut argv: Vec<&[u8]> = vec![b"RPUSH", key.as_ref()];
                        argv.extend(chunk.iter().map(|e| e.as_ref()));
                        write_command(&mut w, &argv)?;
                    }
                }
                Object::Set(set) => {
                    let set = set.borrow();
                    let members: Vec<&Bytes> = set.safe_iter().map(|(m, _)| m).collect();
                    for chunk in members.chunks(REWRITE_ITEMS_PER_CMD) {
                        let mut argv: Vec<&[u8]> = vec![b"SADD", key.as_ref()];
                        argv.extend(chunk.iter().map(|m| m.as_ref()));
                        write_command(&mut w, &argv)?;
                    }
                }
                Object::Hash(hash) => {
                    let hash = hash.borrow();
                    let pairs: Vec<(&Bytes, &Bytes)> = hash.safe_iter().collect();
                    for chunk in pairs.chunks(REWRITE_ITEMS_PER_CMD) {
                        let mut argv: Vec<&[u8]> = vec![b"HSET", key.as_ref()];
                        for (field, value) in chunk {
                            argv.push(field.as_ref());
                            argv.push(value.as_ref());
                        }
                        write_command(&mut w, &argv)?;
                    }
                }
                Object::ZSet(zset) => {
                    let zset = zset.borrow();
                    let zsl = zset.skiplist();
                    let mut pairs: Vec<(String, Bytes)> = Vec::with_capacity(zsl.len());
                    let mut cursor = zsl.first_id();
                    while let Some(id) = cursor {
                        let (member, score) = zsl.entry(id);
                        pairs.push((format_double(score), member.clone()));
                        cursor = zsl.next_id(id);
                    }
                    for chunk in pairs.chunks(REWRITE_ITEMS_PER_CMD) {
                        let mut argv: Vec<&[u8]> = vec![b"ZADD", key.as_ref()];
                        for (score, member) in chunk {
                            argv.push(score.as_bytes());
                            argv.push(member.as_ref());
                        }
                        write_command(&mut w, &argv)?;
                    }
                }
            }
            if let Some(&when) = db.expire.peek(key) {
                let deadline = when.to_string();
                write_command(&mut w, &[b"EXPIREAT", key.as_ref(), deadline.as_bytes()])?;
            }
        }

        w.flush()?;
        w.get_ref().sync_all()?;
        std::fs::rename(&tmp, &self.path)?;

        // The compacted log supersedes whatever the open handle pointed at.
        self.file = None;
        info!("append only file rewrite completed");
        Ok(())
    }
}

fn append_command(buf: &mut Vec<u8>, args: &[Bytes]) {
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
}

fn write_command(w: &mut impl Write, argv: &[&[u8]]) -> io::Result<()> {
    write!(w, "*{}\r\n", argv.len())?;
    for arg in argv {
        write!(w, "${}\r\n", arg.len())?;
        w.write_all(arg)?;
        w.write_all(b"\r\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn feed_serializes_resp_bulk_form() {
        let mut buf = Vec::new();
        append_command(
            &mut buf,
            &[Bytes::from("SET"), Bytes::from("k"), Bytes::from("v")],
        );
        assert_eq!(buf, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn disabled_aof_feeds_nothing() {
        let mut aof = Aof::new(&Config::default());
        aof.feed(&[Bytes::from("SET"), Bytes::from("k"), Bytes::from("v")]);
        assert!(aof.buf.is_empty());
    }

    #[test]
    fn rewrite_chunks_large_containers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.appendonly = true;
        config.appendfilename = dir
            .path()
            .join("appendonly.aof")
            .to_string_lossy()
            .into_owned();

        let mut db = Db::new();
        let set = Object::set();
        if let Object::Set(payload) = &*set {
            let mut payload = payload.borrow_mut();
            for i in 0..150 {
                payload
                    .add(Bytes::from(format!("member:{i:03}")), ())
                    .unwrap();
            }
        }
        db.data.set(Bytes::from("s"), set);

        let mut aof = Aof::new(&config);
        aof.rewrite(&db).unwrap();

        let text = std::fs::read_to_string(aof.path()).unwrap();
        // 150 members at 64 per command means three SADD commands.
        assert_eq!(text.matches("SADD").count(), 3);
        assert!(text.starts_with("*"));
        assert_eq!(text.matches("member:").count(), 150);
    }

    #[test]
    fn rewrite_appends_expireat_after_the_constructor() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.appendonly = true;
        config.appendfilename = dir
            .path()
            .join("appendonly.aof")
            .to_string_lossy()
            .into_owned();

        let mut db = Db::new();
        db.set(Bytes::from("k"), Object::string(Bytes::from("v")));
        db.set_expire(Bytes::from("k"), 99_999_999_999);

        let mut aof = Aof::new(&config);
        aof.rewrite(&db).unwrap();

        let text = std::fs::read_to_string(aof.path()).unwrap();
        let set_at = text.find("SET").unwrap();
        let expire_at = text.find("EXPIREAT").unwrap();
        assert!(set_at < expire_at);
        assert!(text.contains("99999999999"));
    }
}
