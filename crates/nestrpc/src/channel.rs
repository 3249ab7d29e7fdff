//! # RPC Channel
//!
//! Nested, re-entrant request/reply over a single ordered pipe.
//!
//! ## Threads
//!
//! - **Worker thread**: runs the [`Listener`] and is the only thread allowed to
//!   block in [`RpcChannel::call`] or [`RpcChannel::send_sync`].
//! - **I/O thread**: feeds [`RpcChannel::on_message_received`]. It never blocks
//!   on application code; it either wakes a blocked call or posts a task to
//!   the worker loop.
//!
//! Both sides meet on one mutex guarding the pending queue, the call stack,
//! the sync reply slot and the channel state, plus one condvar the worker
//! waits on.
//!
//! ## Nesting and races
//!
//! While a call waits for its reply it keeps serving whatever the peer sends,
//! including in-calls, which may themselves call back out. Every out-call is
//! stamped with our stack depth and our guess of the peer's stack depth. An
//! in-call whose guess disagrees with our real depth means both sides called
//! at the same time; only the depth-1 form of that race is supported, and the
//! [`RacePolicy`](crate::RacePolicy) decides which side's call is served first.

use std::fmt;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::config::ChannelConfig;
use crate::config::Side;
use crate::error::Error;
use crate::error::Result;
use crate::error::Violation;
use crate::link::Link;
use crate::listener::Listener;
use crate::message::Kind;
use crate::message::Message;
use crate::queue::PendingQueue;
use crate::stack::CallStack;
use crate::task::Scheduler;

/// Lifecycle gate. Anything but `Connected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connected,
    /// Closed locally with [`RpcChannel::close`].
    Closed,
    /// Transport failure or peer protocol violation.
    Error,
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub races_detected: u64,
    pub incalls_deferred: u64,
    pub incalls_processed: u64,
}

struct State {
    channel: ChannelState,
    pending: PendingQueue,
    stack: CallStack,
    remote_stack_depth_guess: usize,
    awaiting_sync_reply: bool,
    sync_reply: Option<Message>,
    processing_sync: bool,
    stats: ChannelStats,
}

impl State {
    fn ensure_connected(&self) -> Result<()> {
        match self.channel {
            ChannelState::Connected => Ok(()),
            other => Err(Error::NotConnected(other)),
        }
    }
}

type Guard<'a> = MutexGuard<'a, State>;

struct Inner {
    config: ChannelConfig,
    state: Mutex<State>,
    cvar: Condvar,
    link: Arc<dyn Link>,
    worker: Arc<dyn Scheduler>,
    listener: Arc<dyn Listener>,
}

/// One end of a nested RPC pipe. Cheap to clone; clones share the channel.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<Inner>,
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("name", &self.inner.config.name)
            .field("side", &self.inner.config.side)
            .field("state", &self.state())
            .finish()
    }
}

impl RpcChannel {
    /// Creates a connected channel.
    ///
    /// `link` carries outbound messages, `worker` runs dispatch tasks on the
    /// worker thread, and `listener` handles everything the peer sends.
    pub fn new(
        config: ChannelConfig,
        link: Arc<dyn Link>,
        worker: Arc<dyn Scheduler>,
        listener: Arc<dyn Listener>,
    ) -> Self {
        let state = State {
            channel: ChannelState::Connected,
            pending: PendingQueue::new(),
            stack: CallStack::new(),
            remote_stack_depth_guess: 0,
            awaiting_sync_reply: false,
            sync_reply: None,
            processing_sync: false,
            stats: ChannelStats::default(),
        };

        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                cvar: Condvar::new(),
                link,
                worker,
                listener,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn side(&self) -> Side {
        self.inner.config.side
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ChannelState {
        self.lock().channel
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Number of our out-calls still waiting for a reply.
    pub fn stack_depth(&self) -> usize {
        self.lock().stack.depth()
    }

    pub fn remote_stack_depth_guess(&self) -> usize {
        self.lock().remote_stack_depth_guess
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_awaiting_sync_reply(&self) -> bool {
        self.lock().awaiting_sync_reply
    }

    pub fn stats(&self) -> ChannelStats {
        self.lock().stats
    }

    // ------------------------------------------------------------------
    //  Worker thread
    // ------------------------------------------------------------------

    /// Sends an rpc request and blocks until its reply arrives.
    ///
    /// While blocked, everything the peer sends is served on this thread:
    /// async messages, sync requests and nested in-calls. Returns the reply,
    /// or an error if the peer answered with an error reply, broke the
    /// protocol, or the channel went down.
    pub fn call(&self, mut msg: Message) -> Result<Message> {
        if !msg.is_rpc() || msg.is_reply() {
            return Err(Error::IllegalCall("only rpc requests can be called"));
        }
        if !self.inner.worker.is_current() {
            return Err(Error::IllegalCall("call() must run on the worker thread"));
        }

        let mut state = self.lock();
        if state.processing_sync {
            return Err(Error::IllegalCall("rpc call from inside a sync handler"));
        }
        state.ensure_connected()?;

        let depth = state.stack.depth() + 1;
        msg.stamp_depths(state.remote_stack_depth_guess, depth);
        state.stack.push(msg.clone());
        debug!(
            channel = %self.name(),
            msg_type = msg.msg_type(),
            depth,
            remote_guess = state.remote_stack_depth_guess,
            "rpc out-call"
        );
        drop(state);

        self.send_raw(msg)?;

        let mut state = self.lock();
        loop {
            while state.channel == ChannelState::Connected && state.pending.is_empty() {
                state = self.wait(state);
            }
            state.ensure_connected()?;

            let Some(recvd) = state.pending.pop() else { continue };

            match recvd.kind() {
                Kind::Rpc if recvd.is_reply() => {
                    let Some(outcall_type) = state.stack.top().map(Message::msg_type) else {
                        return Err(self.violate(&mut state, Violation::UnexpectedReply(recvd.msg_type())));
                    };
                    let expected = outcall_type.wrapping_add(1);
                    if !recvd.is_reply_error() && recvd.msg_type() != expected {
                        let v = Violation::ReplyTypeMismatch { expected, found: recvd.msg_type() };
                        return Err(self.violate(&mut state, v));
                    }

                    state.stack.pop();
                    trace!(channel = %self.name(), msg_type = recvd.msg_type(), depth = state.stack.depth(), "rpc reply");

                    if state.stack.is_empty() {
                        self.drain_to_worker(&mut state)?;
                    }
                    drop(state);

                    if recvd.is_reply_error() {
                        return Err(Error::ReplyError { msg_type: outcall_type });
                    }
                    return Ok(recvd);
                }
                Kind::Rpc => {
                    let depth = state.stack.depth();
                    drop(state);
                    self.process_incall(recvd, depth)?;
                    state = self.lock();
                }
                Kind::Sync => {
                    if recvd.is_reply() {
                        return Err(self.violate(&mut state, Violation::UnexpectedReply(recvd.msg_type())));
                    }
                    if !state.pending.is_empty() {
                        return Err(self.violate(&mut state, Violation::SyncNotAlone(recvd.msg_type())));
                    }
                    drop(state);
                    self.dispatch_sync(recvd)?;
                    state = self.lock();
                }
                Kind::Async => {
                    if recvd.is_reply() {
                        return Err(self.violate(&mut state, Violation::UnexpectedReply(recvd.msg_type())));
                    }
                    drop(state);
                    self.dispatch_async(recvd);
                    state = self.lock();
                }
            }
        }
    }

    /// Sends a sync request and blocks until its reply arrives.
    ///
    /// Sync sends do not nest and do not serve in-calls while waiting; async
    /// messages that arrive meanwhile are queued behind the reply.
    pub fn send_sync(&self, msg: Message) -> Result<Message> {
        if !msg.is_sync() || msg.is_reply() {
            return Err(Error::IllegalCall("send_sync() only carries sync requests"));
        }
        if !self.inner.worker.is_current() {
            return Err(Error::IllegalCall("send_sync() must run on the worker thread"));
        }

        let expected = msg.reply_type();
        let mut state = self.lock();
        if state.awaiting_sync_reply || state.processing_sync {
            return Err(Error::IllegalCall("nested sync send"));
        }
        state.ensure_connected()?;
        state.awaiting_sync_reply = true;
        state.sync_reply = None;
        debug!(channel = %self.name(), msg_type = msg.msg_type(), "sync send");
        drop(state);

        if let Err(e) = self.send_raw(msg) {
            self.lock().awaiting_sync_reply = false;
            return Err(e);
        }

        let mut state = self.lock();
        while state.channel == ChannelState::Connected && state.sync_reply.is_none() {
            state = self.wait(state);
        }
        state.awaiting_sync_reply = false;

        let Some(reply) = state.sync_reply.take() else {
            return Err(Error::NotConnected(state.channel));
        };
        if reply.is_reply_error() {
            return Err(Error::ReplyError { msg_type: expected.wrapping_sub(1) });
        }
        if reply.msg_type() != expected {
            let v = Violation::ReplyTypeMismatch { expected, found: reply.msg_type() };
            return Err(self.violate(&mut state, v));
        }
        Ok(reply)
    }

    /// Sends a plain async message. Callable from any thread.
    pub fn send(&self, msg: Message) -> Result<()> {
        if !msg.is_async() || msg.is_reply() {
            return Err(Error::IllegalCall("send() only carries async messages"));
        }
        self.send_raw(msg)
    }

    /// Shuts the channel down locally. Blocked calls fail with
    /// `NotConnected(Closed)`.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.channel == ChannelState::Connected {
            debug!(channel = %self.name(), "closing");
            self.fail(&mut state, ChannelState::Closed);
        }
    }

    /// Runs a received in-call and sends its reply, unless it raced with our
    /// own out-call and this side wins, in which case it is deferred.
    ///
    /// `stack_depth` is our stack depth at the moment the in-call was taken
    /// off the queue.
    pub(crate) fn process_incall(&self, call: Message, stack_depth: usize) -> Result<()> {
        let mut state = self.lock();
        state.ensure_connected()?;
        if !call.is_rpc() || call.is_reply() {
            return Err(self.violate(&mut state, Violation::UnexpectedKind(call.msg_type())));
        }

        if call.rpc_remote_stack_depth_guess() != stack_depth {
            state.stats.races_detected += 1;
            warn!(channel = %self.name(), msg_type = call.msg_type(), "rpc in-calls have raced");

            let single_level = stack_depth == 1
                && state.remote_stack_depth_guess == 0
                && call.rpc_remote_stack_depth_guess() == 0
                && call.rpc_local_stack_depth() == 1;
            if !single_level {
                let v = Violation::UnsupportedRace {
                    stack_depth,
                    local_guess: state.remote_stack_depth_guess,
                    call_guess: call.rpc_remote_stack_depth_guess(),
                    call_depth: call.rpc_local_stack_depth(),
                };
                return Err(self.violate(&mut state, v));
            }

            let Some(defer) = self.inner.config.race_policy.defers(self.side()) else {
                error!(channel = %self.name(), "rpc race with no resolution policy");
                self.fail(&mut state, ChannelState::Error);
                return Err(Error::UnresolvedRace);
            };

            if defer {
                debug!(channel = %self.name(), msg_type = call.msg_type(), "deferring raced in-call");
                // the peer has exactly one frame outstanding: the call we are deferring
                state.remote_stack_depth_guess = 1;
                state.stats.incalls_deferred += 1;
                drop(state);
                self.post("deferred-incall", move |c| c.on_deferred_incall(call));
                return Ok(());
            }
        }

        state.remote_stack_depth_guess += 1;
        state.stats.incalls_processed += 1;
        drop(state);

        let outcome = self.inner.listener.on_call(self, call.clone());

        {
            let mut state = self.lock();
            state.remote_stack_depth_guess = state.remote_stack_depth_guess.saturating_sub(1);
        }

        let reply = match outcome {
            Ok(reply) => reply.into_reply(Kind::Rpc),
            Err(e) => {
                debug!(channel = %self.name(), msg_type = call.msg_type(), "in-call refused: {}", e);
                Message::error_reply_to(&call)
            }
        };
        self.send_raw(reply)
    }

    // Worker-loop tasks.

    fn on_incall(&self, call: Message) -> Result<()> {
        self.process_incall(call, 0)
    }

    fn on_deferred_incall(&self, call: Message) -> Result<()> {
        self.lock().remote_stack_depth_guess = 0;
        self.process_incall(call, 0)
    }

    fn on_delegate(&self, msg: Message) -> Result<()> {
        self.lock().ensure_connected()?;
        match msg.kind() {
            Kind::Async => {
                self.dispatch_async(msg);
                Ok(())
            }
            Kind::Sync => self.dispatch_sync(msg),
            Kind::Rpc => {
                let mut state = self.lock();
                Err(self.violate(&mut state, Violation::UnexpectedKind(msg.msg_type())))
            }
        }
    }

    /// Serves a blocking message queued while no call was waiting, unless a
    /// call already picked it up.
    fn on_maybe_dequeue_one(&self) -> Result<()> {
        let mut state = self.lock();
        if state.channel != ChannelState::Connected || state.pending.is_empty() {
            return Ok(());
        }
        if state.pending.len() != 1 {
            let queued = state.pending.len();
            return Err(self.violate(&mut state, Violation::DequeueInvariant { queued }));
        }
        let Some(msg) = state.pending.pop() else { return Ok(()) };
        if !msg.is_blocker() {
            return Err(self.violate(&mut state, Violation::DequeueInvariant { queued: 1 }));
        }
        drop(state);

        if msg.is_sync() {
            self.dispatch_sync(msg)
        } else {
            self.process_incall(msg, 0)
        }
    }

    fn dispatch_async(&self, msg: Message) {
        let msg_type = msg.msg_type();
        if let Err(e) = self.inner.listener.on_message(self, msg) {
            warn!(channel = %self.name(), msg_type, "async handler failed: {}", e);
        }
    }

    fn dispatch_sync(&self, msg: Message) -> Result<()> {
        self.lock().processing_sync = true;
        let outcome = self.inner.listener.on_sync_message(self, msg.clone());
        self.lock().processing_sync = false;

        let reply = match outcome {
            Ok(reply) => reply.into_reply(Kind::Sync),
            Err(e) => {
                debug!(channel = %self.name(), msg_type = msg.msg_type(), "sync request refused: {}", e);
                Message::error_reply_to(&msg)
            }
        };
        self.send_raw(reply)
    }

    /// Hands whatever queued up during the outermost call to the worker loop,
    /// in arrival order.
    fn drain_to_worker(&self, state: &mut State) -> Result<()> {
        if state.pending.blockers() > 1 {
            return Err(self.violate(state, Violation::MultipleBlockers));
        }
        let drained: Vec<Message> = state.pending.drain().collect();
        for msg in drained {
            if msg.is_rpc() {
                self.post("incall", move |c| c.on_incall(msg));
            } else {
                self.post("delegate", move |c| c.on_delegate(msg));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    //  I/O thread
    // ------------------------------------------------------------------

    /// Accepts one message from the transport.
    ///
    /// Returns an error only when the message breaks the protocol; the channel
    /// has then already moved to [`ChannelState::Error`].
    ///
    /// Async messages keep their arrival order within one call, and within
    /// one idle stretch. An async message that arrived while idle may still be
    /// handled after one that arrives during a later call on this side.
    ///
    /// While idle, a second blocking request is accepted here and rejected by
    /// the worker task that dequeues it.
    pub fn on_message_received(&self, msg: Message) -> Result<()> {
        let mut state = self.lock();
        if state.channel != ChannelState::Connected {
            trace!(channel = %self.name(), msg_type = msg.msg_type(), "dropping message on dead channel");
            return Ok(());
        }

        if state.awaiting_sync_reply && msg.is_sync() {
            if msg.is_reply() {
                state.sync_reply = Some(msg);
                self.inner.cvar.notify_all();
                return Ok(());
            }
            return Err(self.violate(&mut state, Violation::SyncWhileAwaitingSync(msg.msg_type())));
        }
        if msg.is_reply() && (!msg.is_rpc() || state.stack.is_empty()) {
            return Err(self.violate(&mut state, Violation::UnexpectedReply(msg.msg_type())));
        }

        if state.stack.is_empty() {
            if msg.is_async() {
                drop(state);
                self.post("delegate", move |c| c.on_delegate(msg));
            } else {
                // A worker task that is about to call() may pick this up
                // first; the dequeue task then finds nothing.
                state.pending.push(msg);
                drop(state);
                self.post("maybe-dequeue", |c| c.on_maybe_dequeue_one());
            }
            return Ok(());
        }

        if state.awaiting_sync_reply {
            if msg.is_rpc() {
                return Err(self.violate(&mut state, Violation::IncallWhileAwaitingSync(msg.msg_type())));
            }
            state.pending.push(msg);
            return Ok(());
        }

        if msg.is_blocker() && state.pending.has_blocker() {
            return Err(self.violate(&mut state, Violation::MultipleBlockers));
        }
        state.pending.push(msg);
        self.inner.cvar.notify_all();
        Ok(())
    }

    /// The transport failed. Everything blocked on the channel fails.
    pub fn on_channel_error(&self) {
        let mut state = self.lock();
        if state.channel == ChannelState::Connected {
            warn!(channel = %self.name(), "channel error");
            self.fail(&mut state, ChannelState::Error);
        }
    }

    // ------------------------------------------------------------------
    //  Helpers
    // ------------------------------------------------------------------

    fn lock(&self) -> Guard<'_> {
        // poisoning means a panic mid-update; the state cannot be trusted
        self.inner.state.lock().expect("rpc channel state poisoned")
    }

    fn wait<'a>(&self, guard: Guard<'a>) -> Guard<'a> {
        self.inner.cvar.wait(guard).expect("rpc channel state poisoned")
    }

    fn send_raw(&self, msg: Message) -> Result<()> {
        self.lock().ensure_connected()?;
        if let Err(e) = self.inner.link.send(msg) {
            warn!(channel = %self.name(), "link rejected message: {}", e);
            let mut state = self.lock();
            self.fail(&mut state, ChannelState::Error);
            return Err(Error::Link(e));
        }
        Ok(())
    }

    fn post<F>(&self, what: &'static str, f: F)
    where
        F: FnOnce(&RpcChannel) -> Result<()> + Send + 'static,
    {
        let channel = self.clone();
        self.inner.worker.post(Box::new(move || {
            if let Err(e) = f(&channel) {
                warn!(channel = %channel.name(), task = what, "worker task failed: {}", e);
            }
        }));
    }

    fn violate(&self, state: &mut State, v: Violation) -> Error {
        error!(channel = %self.name(), "protocol violation: {}", v);
        self.fail(state, ChannelState::Error);
        Error::Protocol(v)
    }

    /// Moves a connected channel to `to`, drops all queued and outstanding
    /// work and wakes every waiter. The link is hung up.
    fn fail(&self, state: &mut State, to: ChannelState) {
        if state.channel != ChannelState::Connected {
            return;
        }
        state.channel = to;
        state.pending.clear();
        state.stack.clear();
        state.sync_reply = None;
        state.awaiting_sync_reply = false;
        self.inner.cvar.notify_all();
        self.inner.link.close();

        if to == ChannelState::Error {
            let listener = Arc::clone(&self.inner.listener);
            self.inner.worker.post(Box::new(move || listener.on_channel_error()));
        }
    }
}
