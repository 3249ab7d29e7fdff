//! # Error Definitions
//!
//! The central ledger of local misuse, peer protocol faults and channel
//! failures.
//!
//! A peer that breaks the protocol is never "recovered" from: the channel
//! moves to [`ChannelState::Error`] and the fault is reported once as
//! [`Error::Protocol`]. Everything still blocked on the channel then fails
//! with [`Error::NotConnected`].

use std::fmt;

use crate::channel::ChannelState;
use crate::frame::FrameError;
use crate::link::LinkError;
use crate::message::MsgType;

/// Failures surfaced by [`crate::RpcChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The channel was closed or has failed; nothing was sent.
    NotConnected(ChannelState),
    /// The peer answered with an error reply.
    ReplyError { msg_type: MsgType },
    /// The peer broke the protocol. The channel is now unusable.
    Protocol(Violation),
    /// The local side used the channel in a way the protocol forbids.
    IllegalCall(&'static str),
    /// Two in-calls raced and the configured policy refuses to pick a winner.
    UnresolvedRace,
    /// The outbound link rejected a message.
    Link(LinkError),
    /// Bytes from the transport did not form a message.
    Frame(FrameError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected(state) => write!(f, "channel is not connected ({:?})", state),
            Self::ReplyError { msg_type } => write!(f, "peer returned an error reply (type {})", msg_type),
            Self::Protocol(v) => write!(f, "protocol violation: {}", v),
            Self::IllegalCall(what) => write!(f, "illegal call: {}", what),
            Self::UnresolvedRace => write!(f, "rpc race with no resolution policy"),
            Self::Link(e) => write!(f, "link error: {}", e),
            Self::Frame(e) => write!(f, "frame error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<Violation> for Error {
    fn from(v: Violation) -> Self {
        Self::Protocol(v)
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

/// A specialized Result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Ways a peer can misbehave. Each one means the remote side is buggy or
/// compromised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A reply did not carry `outcall + 1` and was not an error reply.
    ReplyTypeMismatch { expected: MsgType, found: MsgType },
    /// A reply arrived with no matching outstanding request.
    UnexpectedReply(MsgType),
    /// A second blocking message was queued while the peer should be blocked.
    MultipleBlockers,
    /// A sync request arrived while we were waiting for a sync reply.
    SyncWhileAwaitingSync(MsgType),
    /// An rpc message arrived while a nested sync send held exclusivity.
    IncallWhileAwaitingSync(MsgType),
    /// A sync request was dequeued with other messages still behind it.
    SyncNotAlone(MsgType),
    /// The in-call raced in a shape other than a depth-1 race.
    UnsupportedRace {
        stack_depth: usize,
        local_guess: usize,
        call_guess: usize,
        call_depth: usize,
    },
    /// A dequeue task found something other than one blocking message.
    DequeueInvariant { queued: usize },
    /// A message kind showed up on a path that never carries it.
    UnexpectedKind(MsgType),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplyTypeMismatch { expected, found } => {
                write!(f, "reply type mismatch: expected {}, found {}", expected, found)
            }
            Self::UnexpectedReply(t) => write!(f, "unexpected reply of type {}", t),
            Self::MultipleBlockers => write!(f, "more than one blocking message queued"),
            Self::SyncWhileAwaitingSync(t) => {
                write!(f, "sync request {} received while awaiting a sync reply", t)
            }
            Self::IncallWhileAwaitingSync(t) => {
                write!(f, "rpc message {} received while awaiting a sync reply", t)
            }
            Self::SyncNotAlone(t) => write!(f, "sync request {} was not alone in the queue", t),
            Self::UnsupportedRace { stack_depth, local_guess, call_guess, call_depth } => write!(
                f,
                "unsupported rpc race: depth {}, guess {}, peer guess {}, peer depth {}",
                stack_depth, local_guess, call_guess, call_depth
            ),
            Self::DequeueInvariant { queued } => {
                write!(f, "dequeue expected one blocking message, found {} queued", queued)
            }
            Self::UnexpectedKind(t) => write!(f, "message {} has an unexpected kind", t),
        }
    }
}
