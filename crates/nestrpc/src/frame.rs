//! # Wire Frames
//!
//! Fixed-header framing for [`Message`] so it can cross a byte transport.
//!
//! ## Format
//!
//! `[type: 4b][flags: 1b][remote guess: 4b][local depth: 4b][len: 4b][payload: len]`
//!
//! All integers are Little-Endian.
//!
//! ## Invariants
//! - **Panic Safety**: decoding returns `Result` for every malformed input.
//! - **Strict**: unknown flag bits and trailing bytes are rejected, not skipped.

use std::fmt;

use crate::message::Kind;
use crate::message::Message;

const SYNC: u8 = 0x01;
const RPC: u8 = 0x02;
const REPLY: u8 = 0x04;
const REPLY_ERROR: u8 = 0x08;
const KNOWN: u8 = SYNC | RPC | REPLY | REPLY_ERROR;

/// Size of everything before the payload.
pub const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 4;

/// Framing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Flag byte has bits outside the known set.
    UnknownFlags(u8),
    /// Both SYNC and RPC are set.
    ConflictingKind,
    /// REPLY_ERROR without REPLY.
    OrphanReplyError,
    /// Bytes left over after the payload.
    TrailingBytes(usize),
    /// A depth or the payload length does not fit in a u32.
    TooLarge(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFlags(b) => write!(f, "unknown flag bits: {:#04x}", b),
            Self::TrailingBytes(n) => write!(f, "{} trailing bytes after payload", n),
            Self::TooLarge(n) => write!(f, "value {} does not fit in a frame field", n),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for FrameError {}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Encodes a message into a fresh buffer.
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN + msg.payload().len());

    let mut flags = match msg.kind() {
        Kind::Async => 0,
        Kind::Sync => SYNC,
        Kind::Rpc => RPC,
    };
    if msg.is_reply() {
        flags |= REPLY;
    }
    if msg.is_reply_error() {
        flags |= REPLY_ERROR;
    }

    buf.extend_from_slice(&msg.msg_type().to_le_bytes());
    buf.push(flags);
    write_len(&mut buf, msg.rpc_remote_stack_depth_guess())?;
    write_len(&mut buf, msg.rpc_local_stack_depth())?;
    write_len(&mut buf, msg.payload().len())?;
    buf.extend_from_slice(msg.payload());
    Ok(buf)
}

/// Decodes exactly one message from `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let mut cur = Cursor { buf: bytes, pos: 0 };

    let msg_type = cur.u32()?;
    let flags = cur.u8()?;
    if flags & !KNOWN != 0 {
        return Err(FrameError::UnknownFlags(flags));
    }
    let kind = match (flags & SYNC != 0, flags & RPC != 0) {
        (true, true) => return Err(FrameError::ConflictingKind),
        (true, false) => Kind::Sync,
        (false, true) => Kind::Rpc,
        (false, false) => Kind::Async,
    };
    let reply = flags & REPLY != 0;
    let reply_error = flags & REPLY_ERROR != 0;
    if reply_error && !reply {
        return Err(FrameError::OrphanReplyError);
    }

    let remote_guess = cur.u32()? as usize;
    let local_depth = cur.u32()? as usize;
    let len = cur.u32()? as usize;
    let payload = cur.take(len)?;

    let rest = bytes.len() - cur.pos;
    if rest != 0 {
        return Err(FrameError::TrailingBytes(rest));
    }

    let mut msg = Message::with_kind(msg_type, kind, payload);
    msg.set_flags(reply, reply_error);
    msg.stamp_depths(remote_guess, local_depth);
    Ok(msg)
}

fn write_len(buf: &mut Vec<u8>, n: usize) -> Result<()> {
    let n32 = u32::try_from(n).map_err(|_| FrameError::TooLarge(n))?;
    buf.extend_from_slice(&n32.to_le_bytes());
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(FrameError::UnexpectedEnd)?;
        let slice = self.buf.get(self.pos..end).ok_or(FrameError::UnexpectedEnd)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
