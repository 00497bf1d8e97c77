//! Server-level commands: introspection, persistence triggers, handshake.

use bytes::Bytes;
use mio::Token;
use tracing::error;

use crate::frame::Frame;
use crate::rdb;
use crate::reactor::now_ms;
use crate::server::Server;

pub fn ping(server: &mut Server, token: Token, _args: &[Bytes]) {
    server.add_reply(token, Frame::Simple("PONG".to_string()));
}

pub fn info(server: &mut Server, token: Token, args: &[Bytes]) {
    let section = args.get(1).map(|s| s.to_ascii_lowercase());
    let text = match section.as_deref() {
        None | Some(b"memory") => {
            let used = server.db.memory_usage();
            format!(
                "# Memory\r\nused_memory:{} b {:.2} kb {:.2} MiB {:.2} GB\r\n",
                used,
                used as f64 / 1024.0,
                used as f64 / 1024.0 / 1024.0,
                used as f64 / 1024.0 / 1024.0 / 1024.0,
            )
        }
        Some(_) => String::new(),
    };
    server.add_reply(token, Frame::Bulk(Bytes::from(text)));
}

/// CONFIG GET answers the two options benchmark clients probe for;
/// CONFIG SET accepts anything and changes nothing.
pub fn config(server: &mut Server, token: Token, args: &[Bytes]) {
    if args[1].eq_ignore_ascii_case(b"get") {
        let Some(option) = args.get(2) else {
            server.add_reply_error(token, "wrong number of arguments for 'config' command");
            return;
        };
        if option.eq_ignore_ascii_case(b"save") {
            server.add_reply(
                token,
                Frame::Array(vec![
                    Frame::Bulk(Bytes::from("save")),
                    Frame::Bulk(Bytes::from("3600 1 300 100 60 10000")),
                ]),
            );
        } else if option.eq_ignore_ascii_case(b"appendonly") {
            let value = if server.aof.enabled { "yes" } else { "no" };
            server.add_reply(
                token,
                Frame::Array(vec![
                    Frame::Bulk(Bytes::from("appendonly")),
                    Frame::Bulk(Bytes::from(value)),
                ]),
            );
        } else {
            server.add_reply_error(token, "Unknown CONFIG option");
        }
    } else if args[1].eq_ignore_ascii_case(b"set") {
        server.add_reply(token, Frame::Simple("OK".to_string()));
    } else {
        server.add_reply_error(token, "Unknown CONFIG subcommand");
    }
}

/// The RESP2 handshake: a flat field/value array describing this server.
pub fn hello(server: &mut Server, token: Token, _args: &[Bytes]) {
    server.add_reply(
        token,
        Frame::Array(vec![
            Frame::Bulk(Bytes::from("server")),
            Frame::Bulk(Bytes::from("oxidis")),
            Frame::Bulk(Bytes::from("version")),
            Frame::Bulk(Bytes::from(env!("CARGO_PKG_VERSION"))),
            Frame::Bulk(Bytes::from("proto")),
            Frame::Integer(2),
            Frame::Bulk(Bytes::from("id")),
            Frame::Integer(1),
            Frame::Bulk(Bytes::from("mode")),
            Frame::Bulk(Bytes::from("standalone")),
            Frame::Bulk(Bytes::from("role")),
            Frame::Bulk(Bytes::from("master")),
            Frame::Bulk(Bytes::from("modules")),
            Frame::Array(Vec::new()),
        ]),
    );
}

fn save_db(server: &mut Server, token: Token, reply: &str) {
    match rdb::save(&server.config.dbfilename, &server.db) {
        Ok(()) => {
            server.dirty = 0;
            server.last_save_ms = now_ms();
            server.add_reply(token, Frame::Simple(reply.to_string()));
        }
        Err(e) => {
            error!("snapshot failed: {e}");
            server.add_reply_error(token, "Error saving DB on disk");
        }
    }
}

pub fn save(server: &mut Server, token: Token, _args: &[Bytes]) {
    save_db(server, token, "OK");
}

pub fn bgsave(server: &mut Server, token: Token, _args: &[Bytes]) {
    save_db(server, token, "Background saving started");
}

pub fn bgrewriteaof(server: &mut Server, token: Token, _args: &[Bytes]) {
    match server.aof.rewrite(&server.db) {
        Ok(()) => server.add_reply(
            token,
            Frame::Simple("Background append-only file rewrite started".to_string()),
        ),
        Err(e) => {
            error!("append only file rewrite failed: {e}");
            server.add_reply_error(token, "Failed to start background AOF rewrite");
        }
    }
}
