//! # Outbound Link
//!
//! The send half of the transport as the channel sees it.
//!
//! - **Fire-and-forget**: `send` only enqueues towards the wire. It never waits
//!   for a reply and must never call back into the channel.
//! - **Ordered**: messages leave in the order `send` was called.
//! - **Hang-up**: `close` is called once when the channel stops being
//!   connected. The link flushes what it already holds and then drops the
//!   connection, so the peer sees the channel go away.

use std::fmt;

use crate::message::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The outbound side is gone.
    Closed,
    /// Anything else the link wants to report.
    Io(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "link closed"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for LinkError {}

/// Hands messages to the I/O side.
pub trait Link: Send + Sync + 'static {
    fn send(&self, msg: Message) -> Result<(), LinkError>;

    fn close(&self) {}
}
