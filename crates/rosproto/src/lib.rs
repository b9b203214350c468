//! rosproto - RouterOS management API wire protocol for Ontrol
//!
//! The router's management protocol is sentence-oriented: a sentence is a
//! sequence of length-prefixed words terminated by a zero-length word. The
//! first word of a request names a command path (`/ip/firewall/nat/print`);
//! the remaining words are attributes (`=key=value`), queries (`?key=value`)
//! or a property list (`=.proplist=a,b,c`). Replies arrive as a stream of
//! `!re` sentences (one per data row) closed by `!done`, or `!trap`/`!fatal`
//! on error.
//!
//! This crate owns the wire layer only: the codec ([`word`], [`sentence`]),
//! the reply model ([`reply`]) and a synchronous-per-connection TCP client
//! ([`client`]). Command builders and row parsing for specific commands live
//! with their callers.

pub mod client;
pub mod reply;
pub mod sentence;
pub mod word;

pub use client::{Client, DialConfig};
pub use reply::{Reply, Row};
pub use sentence::Sentence;

use thiserror::Error;

/// Maximum accepted word length. The device never sends anything close to
/// this; a larger prefix means a desynced stream.
pub const MAX_WORD_LEN: u32 = 16 * 1024 * 1024;

/// Wire protocol errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tcp connect to {addr} timed out after {seconds}s")]
    ConnectTimeout { addr: String, seconds: u64 },

    #[error("login rejected: {0}")]
    LoginRejected(String),

    #[error("device returned trap: {message}")]
    Trap { message: String },

    #[error("device returned fatal: {0}")]
    Fatal(String),

    #[error("read timed out after {seconds}s")]
    ReadTimeout { seconds: u64 },

    #[error("invalid word length prefix 0x{0:02x}")]
    InvalidLength(u8),

    #[error("word length {0} exceeds maximum")]
    WordTooLong(u32),

    #[error("connection is closed")]
    Closed,
}

impl ProtoError {
    /// True for errors that leave the underlying stream unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtoError::Trap { .. })
    }
}
