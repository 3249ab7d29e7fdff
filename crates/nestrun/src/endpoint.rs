//! # Endpoint
//!
//! One end of a connection, fully wired: an [`RpcChannel`], the worker loop
//! its listener runs on, and the I/O loop that owns the transport.

use std::sync::Arc;

use nestrpc::ChannelConfig;
use nestrpc::HandlerError;
use nestrpc::HandlerResult;
use nestrpc::Listener;
use nestrpc::Message;
use nestrpc::RacePolicy;
use nestrpc::RpcChannel;
use nestrpc::Side;
use tracing::debug;

use crate::error::Result;
use crate::io::IoLink;
use crate::io::IoLoop;
use crate::transport::Transport;
use crate::worker::WorkerHandle;
use crate::worker::WorkerLoop;

/// Refuses every request. Used when no listener is configured.
struct NullListener;

impl Listener for NullListener {
    fn on_message(&self, _channel: &RpcChannel, _msg: Message) -> HandlerResult<()> {
        Err(HandlerError::NotKnown)
    }

    fn on_call(&self, _channel: &RpcChannel, _call: Message) -> HandlerResult<Message> {
        Err(HandlerError::NotKnown)
    }
}

/// Fluent builder for an [`Endpoint`].
pub struct EndpointBuilder {
    name: String,
    side: Side,
    race_policy: RacePolicy,
    listener: Option<Arc<dyn Listener>>,
}

impl EndpointBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            side: Side::Parent,
            race_policy: RacePolicy::default(),
            listener: None,
        }
    }

    pub fn side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    pub fn race_policy(mut self, policy: RacePolicy) -> Self {
        self.race_policy = policy;
        self
    }

    pub fn listener(mut self, listener: impl Listener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn shared_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Spawns the worker and I/O loops and connects over `transport`.
    pub fn connect(self, transport: impl Transport) -> Result<Endpoint> {
        let config = ChannelConfig::new(self.name.clone(), self.side).race_policy(self.race_policy);
        let listener = self.listener.unwrap_or_else(|| Arc::new(NullListener));

        let worker = WorkerLoop::spawn(self.name.clone())?;
        let (link, outbound) = IoLink::new();
        let channel = RpcChannel::new(config, Arc::new(link), worker.handle(), listener);
        let io = IoLoop::spawn(self.name.clone(), Arc::new(transport), outbound, channel.clone())?;

        // a handler that panicked may owe the peer a reply
        let failed = channel.clone();
        worker.on_panic(move || failed.on_channel_error());

        debug!(endpoint = %self.name, side = ?self.side, policy = ?self.race_policy, "connected");
        Ok(Endpoint {
            channel,
            worker: Some(worker),
            io: Some(io),
        })
    }
}

/// A connected channel end with its own worker and I/O threads.
pub struct Endpoint {
    channel: RpcChannel,
    worker: Option<WorkerLoop>,
    io: Option<IoLoop>,
}

impl Endpoint {
    pub fn builder(name: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(name)
    }

    pub fn channel(&self) -> &RpcChannel {
        &self.channel
    }

    /// Runs `f` on the worker thread and waits for its result.
    pub fn run_on_worker<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&RpcChannel) -> R + Send + 'static,
    {
        let channel = self.channel.clone();
        self.worker_handle()?.invoke(move || f(&channel))
    }

    /// Issues an rpc call from the worker thread and waits for the reply.
    pub fn call(&self, msg: Message) -> Result<Message> {
        Ok(self.run_on_worker(move |c| c.call(msg))??)
    }

    /// Issues a sync send from the worker thread and waits for the reply.
    pub fn send_sync(&self, msg: Message) -> Result<Message> {
        Ok(self.run_on_worker(move |c| c.send_sync(msg))??)
    }

    /// Sends an async message. Does not involve the worker.
    pub fn send(&self, msg: Message) -> Result<()> {
        Ok(self.channel.send(msg)?)
    }

    /// Closes the channel and stops both loops.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn worker_handle(&self) -> Result<Arc<WorkerHandle>> {
        self.worker
            .as_ref()
            .map(WorkerLoop::handle)
            .ok_or(crate::error::Error::WorkerGone)
    }

    fn stop(&mut self) {
        self.channel.close();
        if let Some(io) = self.io.take() {
            io.shutdown();
        }
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.stop();
    }
}
