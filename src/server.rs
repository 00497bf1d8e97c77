//! Server glue: the listener, the client table, dispatch, cron and the run
//! loop that drives the reactor.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::Path;

use bytes::Bytes;
use mio::net::TcpListener;
use mio::Token;
use tracing::{debug, error, info};

use crate::aof::Aof;
use crate::client::Client;
use crate::commands::{self, CommandSpec};
use crate::config::{Config, FsyncPolicy};
use crate::db::Db;
use crate::frame::Frame;
use crate::rdb;
use crate::reactor::{now_ms, FeType, Reactor, TeType};

const LISTENER: Token = Token(0);
/// Reserved for the detached client that replays the append-only file.
const REPLAY: Token = Token(1);

/// Refill chunk for one socket read.
const READ_CHUNK: usize = 4 * 1024;

const CRON_INTERVAL_MS: i64 = 100;

pub struct Server {
    pub config: Config,
    pub reactor: Reactor,
    listener: TcpListener,
    pub clients: HashMap<Token, Client>,
    pub db: Db,
    pub dirty: u64,
    pub aof: Aof,
    pub last_save_ms: i64,
    /// True while replaying the append-only file; suppresses propagation.
    loading: bool,
    next_token: usize,
}

impl Server {
    pub fn new(config: Config) -> crate::Result<Server> {
        let addr: SocketAddr = format!("127.0.0.1:{}", config.port).parse()?;
        let listener = TcpListener::bind(addr)?;
        let reactor = Reactor::new()?;
        let aof = Aof::new(&config);
        Ok(Server {
            config,
            reactor,
            listener,
            clients: HashMap::new(),
            db: Db::new(),
            dirty: 0,
            aof,
            last_save_ms: now_ms(),
            loading: false,
            next_token: 2,
        })
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn run(&mut self) -> crate::Result<()> {
        let _ = tracing_subscriber::fmt()
            .try_init()
            .map_err(|e| debug!("failed to initialize global tracing: {}", e));

        self.load_data();

        self.reactor
            .add_file_event(&mut self.listener, LISTENER, FeType::Readable, accept_handler)?;
        self.reactor
            .add_time_event(TeType::Normal, CRON_INTERVAL_MS, server_cron);

        info!("oxidis server listening on {}", self.listener.local_addr()?);

        while self.reactor.running() {
            let (timers, files) = self.reactor.wait()?;
            // Time events fire before file events within a tick.
            for (id, proc) in timers {
                proc(self, id);
                self.reactor.touch_time_event(id, now_ms());
            }
            for (token, fe, proc) in files {
                proc(self, token, fe);
            }
        }
        Ok(())
    }

    /// Startup state recovery: prefer the append-only file when it is
    /// enabled and present, fall back to the snapshot.
    pub fn load_data(&mut self) {
        if self.aof.enabled && self.aof.path().exists() {
            self.load_append_only_file();
        } else if Path::new(&self.config.dbfilename).exists() {
            match rdb::load(&self.config.dbfilename, now_ms()) {
                Ok(db) => {
                    info!("loaded {} keys from {}", db.len(), self.config.dbfilename);
                    self.db = db;
                }
                Err(e) => error!("error loading rdb file: {e}"),
            }
        }
    }

    /// Replay the log by feeding it through a detached client, so the bytes
    /// travel the exact parse-and-dispatch path a socket would.
    fn load_append_only_file(&mut self) {
        let data = match std::fs::read(self.aof.path()) {
            Ok(data) => data,
            Err(e) => {
                error!("error reading append only file: {e}");
                return;
            }
        };
        self.loading = true;
        let mut replay = Client::detached(REPLAY);
        replay.query.extend_from_slice(&data);
        self.clients.insert(REPLAY, replay);
        loop {
            let parsed = match self.clients.get_mut(&REPLAY) {
                Some(client) => client.parse_one(),
                None => break,
            };
            match parsed {
                Ok(true) => {
                    let empty = match self.clients.get_mut(&REPLAY) {
                        Some(client) => {
                            if client.args.is_empty() {
                                client.reset();
                                true
                            } else {
                                false
                            }
                        }
                        None => break,
                    };
                    if !empty {
                        self.process_command(REPLAY);
                    }
                }
                Ok(false) => break,
                Err(e) => {
                    error!("truncated or corrupt append only file: {e}");
                    break;
                }
            }
        }
        self.clients.remove(&REPLAY);
        self.loading = false;
        self.dirty = 0;
        info!("append only file loaded, {} keys", self.db.len());
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Queue a serialized reply on a client and arm its writable event. The
    /// detached replay client swallows replies.
    pub fn add_reply(&mut self, token: Token, frame: Frame) {
        let Some(client) = self.clients.get_mut(&token) else {
            return;
        };
        if client.stream.is_none() {
            return;
        }
        client.reply.push_back(Bytes::from(frame.serialize()));
        let Some(stream) = client.stream.as_mut() else {
            return;
        };
        if let Err(e) =
            self.reactor
                .add_file_event(stream, token, FeType::Writable, send_reply_to_client)
        {
            error!("error arming writable event: {e}");
        }
    }

    pub fn add_reply_error(&mut self, token: Token, msg: &str) {
        self.add_reply(token, Frame::err(msg));
    }

    fn reset_client(&mut self, token: Token) {
        if let Some(client) = self.clients.get_mut(&token) {
            client.reset();
        }
    }

    /// Tear a client down: unregister both directions, close the socket and
    /// drop its parser state and reply queue.
    pub fn free_client(&mut self, token: Token) {
        if let Some(mut client) = self.clients.remove(&token) {
            if let Some(mut stream) = client.stream.take() {
                let _ = self
                    .reactor
                    .remove_file_event(&mut stream, token, FeType::Readable);
                let _ = self
                    .reactor
                    .remove_file_event(&mut stream, token, FeType::Writable);
            }
            debug!("freed client {:?}", token);
        }
    }

    pub fn process_command(&mut self, token: Token) {
        let args = match self.clients.get_mut(&token) {
            Some(client) => std::mem::take(&mut client.args),
            None => return,
        };
        if args.is_empty() {
            return;
        }
        let name = String::from_utf8_lossy(&args[0]).to_lowercase();
        debug!("process command: {}", name);

        if name == "quit" {
            self.add_reply(token, Frame::Simple("OK".to_string()));
            if let Some(client) = self.clients.get_mut(&token) {
                client.close_after_reply = true;
            }
            return;
        }

        let Some(cmd) = commands::lookup(&name) else {
            self.add_reply_error(token, "unknow command");
            self.reset_client(token);
            return;
        };
        let argc = args.len() as i32;
        if (cmd.arity > 0 && cmd.arity != argc) || (cmd.arity < 0 && argc < -cmd.arity) {
            self.add_reply_error(
                token,
                &format!("wrong number of arguments for '{}' command", cmd.name),
            );
            self.reset_client(token);
            return;
        }

        let dirty_before = self.dirty;
        (cmd.proc)(self, token, &args);
        // Only commands that actually mutated something reach the log; a
        // rejected SETEX or a no-op SADD must not change replay results.
        if cmd.write && !self.loading && self.dirty != dirty_before {
            self.propagate(cmd, &args);
        }
        self.reset_client(token);
    }

    /// Feed an executed write command to the append-only file. Commands
    /// that arm a relative expiry are rewritten against the wall clock so
    /// that replaying the log later cannot stretch a deadline.
    fn propagate(&mut self, cmd: &CommandSpec, args: &[Bytes]) {
        if !self.aof.enabled {
            return;
        }
        match cmd.name {
            "expire" => {
                if let Some(seconds) = commands::parse_int(&args[2]) {
                    let when = now_ms() + seconds.saturating_mul(1000);
                    self.aof.feed(&[
                        Bytes::from_static(b"EXPIREAT"),
                        args[1].clone(),
                        Bytes::from(when.to_string()),
                    ]);
                }
            }
            "setex" => {
                if let Some(seconds) = commands::parse_int(&args[2]) {
                    let when = now_ms() + seconds.saturating_mul(1000);
                    self.aof.feed(&[
                        Bytes::from_static(b"SET"),
                        args[1].clone(),
                        args[3].clone(),
                    ]);
                    self.aof.feed(&[
                        Bytes::from_static(b"EXPIREAT"),
                        args[1].clone(),
                        Bytes::from(when.to_string()),
                    ]);
                }
            }
            _ => self.aof.feed(args),
        }
    }
}

fn accept_handler(server: &mut Server, _token: Token, _fe: FeType) {
    loop {
        match server.listener.accept() {
            Ok((stream, addr)) => {
                let token = server.alloc_token();
                let mut client = Client::new(stream, token);
                if let Some(stream) = client.stream.as_mut() {
                    if let Err(e) = server.reactor.add_file_event(
                        stream,
                        token,
                        FeType::Readable,
                        read_query_from_client,
                    ) {
                        error!("error registering client: {e}");
                        continue;
                    }
                }
                info!("accepted connection from {:?}", addr);
                server.clients.insert(token, client);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                error!("accept error: {e}");
                break;
            }
        }
    }
}

fn read_query_from_client(server: &mut Server, token: Token, _fe: FeType) {
    // Drain the socket into the query buffer.
    loop {
        let Some(client) = server.clients.get_mut(&token) else {
            return;
        };
        let Some(stream) = client.stream.as_mut() else {
            return;
        };
        let start = client.query.len();
        client.query.resize(start + READ_CHUNK, 0);
        match stream.read(&mut client.query[start..]) {
            Ok(0) => {
                client.query.truncate(start);
                debug!("client {:?} closed connection", token);
                server.free_client(token);
                return;
            }
            Ok(n) => {
                client.query.truncate(start + n);
                if n < READ_CHUNK {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                client.query.truncate(start);
                break;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                client.query.truncate(start);
            }
            Err(e) => {
                client.query.truncate(start);
                error!("client {:?} read error: {e}", token);
                server.free_client(token);
                return;
            }
        }
    }

    // Peel off and dispatch every complete command.
    loop {
        let parsed = match server.clients.get_mut(&token) {
            Some(client) => client.parse_one(),
            None => return,
        };
        match parsed {
            Ok(true) => {
                let empty = match server.clients.get_mut(&token) {
                    Some(client) => {
                        if client.args.is_empty() {
                            client.reset();
                            true
                        } else {
                            false
                        }
                    }
                    None => return,
                };
                if !empty {
                    server.process_command(token);
                }
                // A terminal command stops the pipeline; the client closes
                // once its replies drain.
                let done = server
                    .clients
                    .get(&token)
                    .map_or(true, |client| client.close_after_reply);
                if done {
                    break;
                }
            }
            Ok(false) => break,
            Err(e) => {
                error!("client {:?} protocol error: {e}", token);
                server.free_client(token);
                return;
            }
        }
    }
}

fn send_reply_to_client(server: &mut Server, token: Token, _fe: FeType) {
    let mut broken = false;
    if let Some(client) = server.clients.get_mut(&token) {
        while let Some(id) = client.reply.front_id() {
            let Some(buf) = client.reply.get(id).cloned() else {
                break;
            };
            let Some(stream) = client.stream.as_mut() else {
                return;
            };
            match stream.write(&buf[client.sent_len..]) {
                Ok(0) => {
                    broken = true;
                    break;
                }
                Ok(n) => {
                    client.sent_len += n;
                    if client.sent_len == buf.len() {
                        client.reply.remove(id);
                        client.sent_len = 0;
                    } else {
                        // Kernel buffer is full; resume on the next
                        // writable readiness.
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("client {:?} send error: {e}", token);
                    broken = true;
                    break;
                }
            }
        }
    } else {
        return;
    }
    if broken {
        server.free_client(token);
        return;
    }

    let (drained, close) = match server.clients.get(&token) {
        Some(client) => (client.reply.is_empty(), client.close_after_reply),
        None => return,
    };
    if drained {
        if let Some(client) = server.clients.get_mut(&token) {
            client.sent_len = 0;
            if let Some(stream) = client.stream.as_mut() {
                if let Err(e) =
                    server
                        .reactor
                        .remove_file_event(stream, token, FeType::Writable)
                {
                    debug!("error disarming writable event: {e}");
                }
            }
        }
        if close {
            server.free_client(token);
        }
    }
}

/// The recurring background job: sampled expiry, periodic AOF fsync and
/// threshold-triggered snapshots.
fn server_cron(server: &mut Server, _id: u64) {
    let now = now_ms();

    let evicted = server.db.active_expire_cycle(now);
    if evicted > 0 {
        debug!("expired {} keys", evicted);
    }

    if server.aof.enabled
        && server.aof.policy() == FsyncPolicy::Everysec
        && now - server.aof.last_fsync_ms >= 1000
    {
        server.aof.flush();
    }

    if server.config.save_changes > 0
        && server.dirty >= server.config.save_changes
        && now - server.last_save_ms >= server.config.save_seconds as i64 * 1000
    {
        match rdb::save(&server.config.dbfilename, &server.db) {
            Ok(()) => {
                info!("scheduled snapshot complete, {} changes", server.dirty);
                server.dirty = 0;
                server.last_save_ms = now;
            }
            Err(e) => error!("scheduled snapshot failed: {e}"),
        }
    }
}
