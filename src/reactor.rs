//! Single-threaded event loop.
//!
//! File events are keyed by (token, direction) with at most one handler per
//! key; time events live in a list walked for every tick. Handlers are plain
//! function pointers over the server, the shape that lets a handler freely
//! mutate the server (including the event set itself) without borrowing
//! against the reactor. The readiness primitive is `mio::Poll`.

use std::collections::HashMap;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

use crate::server::Server;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeType {
    Readable,
    Writable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeType {
    /// Re-armed after every firing.
    Normal,
    /// Removed after the first firing.
    Once,
}

pub type FileProc = fn(&mut Server, Token, FeType);
pub type TimeProc = fn(&mut Server, u64);

pub fn now_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(_) => 0,
    }
}

#[derive(Default)]
struct FileEvent {
    read: Option<FileProc>,
    write: Option<FileProc>,
}

impl FileEvent {
    fn interests(&self) -> Option<Interest> {
        match (self.read.is_some(), self.write.is_some()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

struct TimeEvent {
    id: u64,
    kind: TeType,
    when_ms: i64,
    interval_ms: i64,
    proc: TimeProc,
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    file_events: HashMap<Token, FileEvent>,
    time_events: Vec<TimeEvent>,
    next_time_id: u64,
    stopped: bool,
}

impl Reactor {
    pub fn new() -> io::Result<Reactor> {
        Ok(Reactor {
            poll: Poll::new()?,
            events: Events::with_capacity(128),
            file_events: HashMap::new(),
            time_events: Vec::new(),
            next_time_id: 1,
            stopped: false,
        })
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn running(&self) -> bool {
        !self.stopped
    }

    /// Register (or replace) the handler for one direction of a source,
    /// programming the multiplexer with the union of live directions.
    pub fn add_file_event<S: Source>(
        &mut self,
        source: &mut S,
        token: Token,
        fe: FeType,
        proc: FileProc,
    ) -> io::Result<()> {
        let existed = self.file_events.contains_key(&token);
        let event = self.file_events.entry(token).or_default();
        match fe {
            FeType::Readable => event.read = Some(proc),
            FeType::Writable => event.write = Some(proc),
        }
        let interests = match event.interests() {
            Some(interests) => interests,
            None => return Ok(()),
        };
        if existed {
            self.poll.registry().reregister(source, token, interests)
        } else {
            self.poll.registry().register(source, token, interests)
        }
    }

    /// Drop one direction; the source is deregistered once neither
    /// direction has a handler.
    pub fn remove_file_event<S: Source>(
        &mut self,
        source: &mut S,
        token: Token,
        fe: FeType,
    ) -> io::Result<()> {
        let Some(event) = self.file_events.get_mut(&token) else {
            return Ok(());
        };
        match fe {
            FeType::Readable => event.read = None,
            FeType::Writable => event.write = None,
        }
        match event.interests() {
            Some(interests) => self.poll.registry().reregister(source, token, interests),
            None => {
                self.file_events.remove(&token);
                self.poll.registry().deregister(source)
            }
        }
    }

    pub fn add_time_event(&mut self, kind: TeType, interval_ms: i64, proc: TimeProc) -> u64 {
        let id = self.next_time_id;
        self.next_time_id += 1;
        self.time_events.insert(
            0,
            TimeEvent {
                id,
                kind,
                when_ms: now_ms() + interval_ms,
                interval_ms,
                proc,
            },
        );
        id
    }

    pub fn remove_time_event(&mut self, id: u64) {
        self.time_events.retain(|te| te.id != id);
    }

    /// Re-arm or retire a time event that just fired.
    pub fn touch_time_event(&mut self, id: u64, fired_at_ms: i64) {
        let kind = match self.time_events.iter().find(|te| te.id == id) {
            Some(te) => te.kind,
            None => return,
        };
        match kind {
            TeType::Once => self.remove_time_event(id),
            TeType::Normal => {
                if let Some(te) = self.time_events.iter_mut().find(|te| te.id == id) {
                    te.when_ms = fired_at_ms + te.interval_ms;
                }
            }
        }
    }

    /// Block on the multiplexer until the nearest timer (capped at one
    /// second when no timers exist), then report due time events and ready
    /// file events. An interrupted wait reports nothing.
    pub fn wait(&mut self) -> io::Result<(Vec<(u64, TimeProc)>, Vec<(Token, FeType, FileProc)>)> {
        let now = now_ms();
        let timeout = match self.time_events.iter().map(|te| te.when_ms).min() {
            Some(nearest) => Duration::from_millis((nearest - now).max(0) as u64),
            None => Duration::from_millis(1000),
        };

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok((Vec::new(), Vec::new()))
            }
            Err(e) => return Err(e),
        }

        let mut files = Vec::new();
        for event in self.events.iter() {
            let token = event.token();
            let Some(fe) = self.file_events.get(&token) else {
                continue;
            };
            if event.is_readable() {
                if let Some(proc) = fe.read {
                    files.push((token, FeType::Readable, proc));
                }
            }
            if event.is_writable() {
                if let Some(proc) = fe.write {
                    files.push((token, FeType::Writable, proc));
                }
            }
        }

        let now = now_ms();
        let timers = self
            .time_events
            .iter()
            .filter(|te| te.when_ms <= now)
            .map(|te| (te.id, te.proc))
            .collect();

        Ok((timers, files))
    }
}
