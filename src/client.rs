//! Per-connection state: the resumable request parser and the reply queue.
//!
//! A client accumulates raw socket bytes in a growable buffer and peels
//! complete commands off the front. Partial frames leave the parser state
//! (`cmd_type`, `bulk_num`, `bulk_len`) in place for the next read. Replies
//! queue as ready-to-send byte chunks and drain on writable readiness, with
//! `sent_len` carrying partial-write progress across ticks.

use bytes::{Buf, Bytes, BytesMut};
use mio::net::TcpStream;
use mio::Token;
use thiserror::Error as ThisError;

use crate::list::List;

/// Initial query buffer capacity and the refill chunk for socket reads.
pub const IO_BUF: usize = 16 * 1024;
/// Ceiling for one bulk string; longer is a protocol error.
pub const MAX_BULK: usize = 4 * 1024;
/// Ceiling for one inline command line.
pub const MAX_INLINE: usize = 4 * 1024;
/// Ceiling for the argument count of one bulk command.
const MAX_MULTIBULK: usize = 1024 * 1024;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ParseError {
    #[error("too big inline cmd")]
    InlineTooLong,
    #[error("too big bulk")]
    BulkTooLong,
    #[error("expect $ for bulk length")]
    ExpectedBulkLength,
    #[error("invalid multibulk length")]
    BadLength,
    #[error("expect CRLF for bulk end")]
    MissingCrlf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmdType {
    Unknown,
    Inline,
    Bulk,
}

pub struct Client {
    /// `None` for the detached client that replays the append-only file.
    pub stream: Option<TcpStream>,
    pub token: Token,
    pub args: Vec<Bytes>,
    pub reply: List<Bytes>,
    pub sent_len: usize,
    pub query: BytesMut,
    pub close_after_reply: bool,
    cmd_type: CmdType,
    bulk_num: usize,
    bulk_len: Option<usize>,
}

impl Client {
    pub fn new(stream: TcpStream, token: Token) -> Client {
        Client {
            stream: Some(stream),
            token,
            args: Vec::new(),
            reply: List::new(),
            sent_len: 0,
            query: BytesMut::with_capacity(IO_BUF),
            close_after_reply: false,
            cmd_type: CmdType::Unknown,
            bulk_num: 0,
            bulk_len: None,
        }
    }

    /// A client with no socket, used to feed the command path from a file.
    pub fn detached(token: Token) -> Client {
        Client {
            stream: None,
            token,
            args: Vec::new(),
            reply: List::new(),
            sent_len: 0,
            query: BytesMut::new(),
            close_after_reply: false,
            cmd_type: CmdType::Unknown,
            bulk_num: 0,
            bulk_len: None,
        }
    }

    /// Clear per-command state after a dispatch or a recoverable error.
    pub fn reset(&mut self) {
        self.args.clear();
        self.cmd_type = CmdType::Unknown;
        self.bulk_num = 0;
        self.bulk_len = None;
    }

    /// Try to peel one complete command off the query buffer into `args`.
    /// `Ok(true)` means a command is ready (possibly with zero args for an
    /// empty line); `Ok(false)` means more bytes are needed.
    pub fn parse_one(&mut self) -> Result<bool, ParseError> {
        if self.query.is_empty() {
            return Ok(false);
        }
        if self.cmd_type == CmdType::Unknown {
            self.cmd_type = if self.query[0] == b'*' {
                CmdType::Bulk
            } else {
                CmdType::Inline
            };
        }
        match self.cmd_type {
            CmdType::Inline => self.parse_inline(),
            CmdType::Bulk => self.parse_bulk(),
            CmdType::Unknown => unreachable!("cmd_type assigned above"),
        }
    }

    /// Byte offset of the next CRLF. A line beyond the inline ceiling is an
    /// error whether or not its terminator has arrived yet.
    fn find_line(&self) -> Result<Option<usize>, ParseError> {
        match self.query.windows(2).position(|pair| pair == b"\r\n") {
            Some(idx) if idx > MAX_INLINE => Err(ParseError::InlineTooLong),
            Some(idx) => Ok(Some(idx)),
            None if self.query.len() > MAX_INLINE => Err(ParseError::InlineTooLong),
            None => Ok(None),
        }
    }

    fn parse_inline(&mut self) -> Result<bool, ParseError> {
        let Some(idx) = self.find_line()? else {
            return Ok(false);
        };
        let line = self.query.split_to(idx + 2).freeze();
        self.args = line[..idx]
            .split(|b| b.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .map(Bytes::copy_from_slice)
            .collect();
        Ok(true)
    }

    fn parse_bulk(&mut self) -> Result<bool, ParseError> {
        if self.bulk_num == 0 {
            let Some(idx) = self.find_line()? else {
                return Ok(false);
            };
            let count = parse_length(&self.query[1..idx])?;
            if count > MAX_MULTIBULK {
                return Err(ParseError::BadLength);
            }
            self.query.advance(idx + 2);
            if count == 0 {
                return Ok(true);
            }
            self.bulk_num = count;
            self.args = Vec::with_capacity(count);
        }
        while self.bulk_num > 0 {
            let len = match self.bulk_len {
                Some(len) => len,
                None => {
                    let Some(idx) = self.find_line()? else {
                        return Ok(false);
                    };
                    if self.query[0] != b'$' {
                        return Err(ParseError::ExpectedBulkLength);
                    }
                    let len = parse_length(&self.query[1..idx])?;
                    if len > MAX_BULK {
                        return Err(ParseError::BulkTooLong);
                    }
                    self.query.advance(idx + 2);
                    self.bulk_len = Some(len);
                    len
                }
            };
            if self.query.len() < len + 2 {
                return Ok(false);
            }
            if &self.query[len..len + 2] != b"\r\n" {
                return Err(ParseError::MissingCrlf);
            }
            let body = self.query.split_to(len + 2).freeze().slice(0..len);
            self.args.push(body);
            self.bulk_len = None;
            self.bulk_num -= 1;
        }
        Ok(true)
    }
}

fn parse_length(digits: &[u8]) -> Result<usize, ParseError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or(ParseError::BadLength)
}
