//! # Message Envelope
//!
//! The unit that crosses the pipe. A message is opaque to the channel except
//! for its type id and its classification bits.
//!
//! ## Invariants
//! - **Exclusive Kind**: a message is exactly one of async, sync or rpc.
//!   This is encoded in [`Kind`], so "sync and rpc at once" cannot be built.
//! - **Reply Numbering**: the reply to a request of type `T` has type `T + 1`.

/// Numeric message type id. Replies use `request + 1`.
pub type MsgType = u32;

/// Delivery semantics of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Fire-and-forget.
    Async,
    /// Blocking request answered by exactly one sync reply. Never nests.
    Sync,
    /// Blocking request that may nest and race.
    Rpc,
}

/// A request, reply or notification travelling over the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    msg_type: MsgType,
    kind: Kind,
    reply: bool,
    reply_error: bool,
    remote_stack_depth_guess: usize,
    local_stack_depth: usize,
    payload: Vec<u8>,
}

impl Message {
    /// Creates a plain async message.
    pub fn new(msg_type: MsgType, payload: impl Into<Vec<u8>>) -> Self {
        Self::with_kind(msg_type, Kind::Async, payload)
    }

    /// Creates a sync request.
    pub fn sync(msg_type: MsgType, payload: impl Into<Vec<u8>>) -> Self {
        Self::with_kind(msg_type, Kind::Sync, payload)
    }

    /// Creates an rpc request.
    pub fn rpc(msg_type: MsgType, payload: impl Into<Vec<u8>>) -> Self {
        Self::with_kind(msg_type, Kind::Rpc, payload)
    }

    pub fn with_kind(msg_type: MsgType, kind: Kind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_type,
            kind,
            reply: false,
            reply_error: false,
            remote_stack_depth_guess: 0,
            local_stack_depth: 0,
            payload: payload.into(),
        }
    }

    /// Builds the successful reply to `request`, numbered `request + 1`.
    pub fn reply_to(request: &Message, payload: impl Into<Vec<u8>>) -> Self {
        let mut reply = Self::with_kind(request.reply_type(), request.kind, payload);
        reply.reply = true;
        reply
    }

    /// Builds a generic error reply to `request`. Carries no payload.
    pub fn error_reply_to(request: &Message) -> Self {
        let mut reply = Self::reply_to(request, Vec::new());
        reply.reply_error = true;
        reply
    }

    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_async(&self) -> bool {
        self.kind == Kind::Async
    }

    pub fn is_sync(&self) -> bool {
        self.kind == Kind::Sync
    }

    pub fn is_rpc(&self) -> bool {
        self.kind == Kind::Rpc
    }

    pub fn is_reply(&self) -> bool {
        self.reply
    }

    pub fn is_reply_error(&self) -> bool {
        self.reply_error
    }

    /// True for requests that leave the sender blocked on us: sync and rpc
    /// requests. Replies never block.
    pub fn is_blocker(&self) -> bool {
        !self.reply && self.kind != Kind::Async
    }

    /// The type a reply to this message must carry.
    pub fn reply_type(&self) -> MsgType {
        self.msg_type.wrapping_add(1)
    }

    /// The sender's belief about the receiver's stack depth when this was sent.
    pub fn rpc_remote_stack_depth_guess(&self) -> usize {
        self.remote_stack_depth_guess
    }

    /// The sender's own stack depth, including this call.
    pub fn rpc_local_stack_depth(&self) -> usize {
        self.local_stack_depth
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub(crate) fn stamp_depths(&mut self, remote_guess: usize, local_depth: usize) {
        self.remote_stack_depth_guess = remote_guess;
        self.local_stack_depth = local_depth;
    }

    pub(crate) fn set_flags(&mut self, reply: bool, reply_error: bool) {
        self.reply = reply;
        self.reply_error = reply_error;
    }

    /// Forces the reply bits for a handler-built answer of the given kind.
    pub(crate) fn into_reply(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self.reply = true;
        self
    }
}
