//! # NestRPC
//!
//! Nested, blocking request/reply between two processes over one ordered
//! message pipe.
//!
//! ## Architecture
//!
//! Each end owns an [`RpcChannel`]. The transport's I/O thread pushes
//! everything it reads into [`RpcChannel::on_message_received`]; the
//! application's worker thread issues [`RpcChannel::call`], which blocks, but
//! keeps serving the peer's in-calls while it waits. Calls may nest to any
//! depth in both directions. When both ends call each other at the same time
//! the race is detected from the stack depths stamped on every rpc message
//! and resolved by the configured [`RacePolicy`].
//!
//! The crate is transport agnostic: outbound traffic goes through a [`Link`],
//! worker-loop tasks through a [`Scheduler`], and application code sits
//! behind a [`Listener`]. [`frame`] gives a byte encoding for transports that
//! need one.

mod channel;
mod config;
mod error;
mod link;
mod listener;
mod message;
mod queue;
mod stack;
mod task;

pub mod frame;

#[cfg(test)]
mod mock;

pub use channel::ChannelState;
pub use channel::ChannelStats;
pub use channel::RpcChannel;
pub use config::ChannelConfig;
pub use config::ParseError;
pub use config::RacePolicy;
pub use config::Side;
pub use error::Error;
pub use error::Result;
pub use error::Violation;
pub use frame::FrameError;
pub use link::Link;
pub use link::LinkError;
pub use listener::HandlerError;
pub use listener::HandlerResult;
pub use listener::Listener;
pub use message::Kind;
pub use message::Message;
pub use message::MsgType;
pub use queue::PendingQueue;
pub use stack::CallStack;
pub use task::Scheduler;
pub use task::Task;
