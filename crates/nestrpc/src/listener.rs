//! # Application Listener
//!
//! The application side of the channel. Every method runs on the worker
//! thread with the channel unlocked, so handlers may send, call or
//! `send_sync` through the `channel` they are given, except from inside
//! [`Listener::on_sync_message`], where blocking sends are refused.

use std::fmt;

use crate::channel::RpcChannel;
use crate::message::Message;

/// Why a handler did not produce a reply. The channel answers the peer with a
/// generic error reply instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerError {
    /// Unknown message type.
    NotKnown,
    /// Known, but refused in the current state.
    NotAllowed,
    /// Payload could not be read.
    PayloadError,
    /// No actor to route to.
    RouteError,
    /// Payload was read but held invalid values.
    ValueError,
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for HandlerError {}

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

pub trait Listener: Send + Sync + 'static {
    /// A plain async message.
    fn on_message(&self, channel: &RpcChannel, msg: Message) -> HandlerResult<()>;

    /// A sync request. The returned message is sent back as the sync reply.
    fn on_sync_message(&self, _channel: &RpcChannel, _msg: Message) -> HandlerResult<Message> {
        Err(HandlerError::NotKnown)
    }

    /// An rpc in-call. The returned message is sent back as the rpc reply; it
    /// should be built with [`Message::reply_to`].
    fn on_call(&self, channel: &RpcChannel, call: Message) -> HandlerResult<Message>;

    /// The channel has failed. Posted once to the worker loop.
    fn on_channel_error(&self) {}
}
