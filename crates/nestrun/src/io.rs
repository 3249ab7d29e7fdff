//! # I/O Loop
//!
//! The I/O thread: a dedicated OS thread driving a current-thread tokio
//! runtime. It owns the transport and never runs application code.
//!
//! - **Reader**: decodes each inbound frame and hands it to
//!   [`RpcChannel::on_message_received`], which only queues or wakes.
//! - **Writer**: drains the outbound queue that [`IoLink`] feeds, in order.
//!
//! Whichever side fails first ends the loop and the channel is told with
//! [`RpcChannel::on_channel_error`]. When the channel goes down for its own
//! reasons it hangs up through [`IoLink`]: the writer flushes what is queued
//! and the loop drops the transport, so the peer sees the end of the stream.

use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use nestrpc::Link;
use nestrpc::LinkError;
use nestrpc::Message;
use nestrpc::RpcChannel;
use nestrpc::frame;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;
use crate::transport;
use crate::transport::Transport;

/// The channel's outbound [`Link`]: enqueues for the writer task.
pub struct IoLink {
    tx: mpsc::UnboundedSender<Message>,
    hangup: Arc<Notify>,
}

/// What the I/O loop drains: the outbound queue and the hang-up signal.
pub struct Outbound {
    rx: mpsc::UnboundedReceiver<Message>,
    hangup: Arc<Notify>,
}

impl IoLink {
    /// Creates the link and the queue the I/O loop will drain.
    pub fn new() -> (Self, Outbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hangup = Arc::new(Notify::new());
        let outbound = Outbound { rx, hangup: Arc::clone(&hangup) };
        (Self { tx, hangup }, outbound)
    }
}

impl Link for IoLink {
    fn send(&self, msg: Message) -> std::result::Result<(), LinkError> {
        self.tx.send(msg).map_err(|_| LinkError::Closed)
    }

    fn close(&self) {
        // stores a permit if the loop is not waiting yet
        self.hangup.notify_one();
    }
}

/// Owns the I/O thread.
pub struct IoLoop {
    stop: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl IoLoop {
    pub fn spawn(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        outbound: Outbound,
        channel: RpcChannel,
    ) -> Result<Self> {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (stop_tx, stop_rx) = oneshot::channel();

        let join = thread::Builder::new()
            .name(format!("{}-io", name))
            .spawn(move || {
                runtime.block_on(pump(name, transport, outbound, channel, stop_rx));
            })?;

        Ok(Self { stop: Some(stop_tx), join: Some(join) })
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for IoLoop {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

async fn pump(
    name: String,
    transport: Arc<dyn Transport>,
    mut outbound: Outbound,
    channel: RpcChannel,
    stop: oneshot::Receiver<()>,
) {
    let reason = tokio::select! {
        e = read_loop(transport.as_ref(), &channel) => e,
        e = write_loop(transport.as_ref(), &mut outbound.rx) => e,
        _ = outbound.hangup.notified() => {
            flush(transport.as_ref(), &mut outbound.rx).await;
            debug!(channel = %name, state = ?channel.state(), "channel down, hanging up");
            return;
        }
        _ = stop => {
            debug!(channel = %name, "i/o loop stopped");
            return;
        }
    };

    warn!(channel = %name, "i/o loop ended: {}", reason);
    channel.on_channel_error();
}

async fn read_loop(transport: &dyn Transport, channel: &RpcChannel) -> Error {
    loop {
        let bytes = match transport.recv().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Error::Transport(transport::Error::ConnectionLost("peer closed".into())),
            Err(e) => return Error::Transport(e),
        };

        let msg = match frame::decode(&bytes) {
            Ok(msg) => msg,
            Err(e) => return Error::Rpc(e.into()),
        };
        trace!(channel = %channel.name(), msg_type = msg.msg_type(), kind = ?msg.kind(), "recv");

        if let Err(e) = channel.on_message_received(msg) {
            return Error::Rpc(e);
        }
    }
}

async fn write_loop(transport: &dyn Transport, outbound: &mut mpsc::UnboundedReceiver<Message>) -> Error {
    while let Some(msg) = outbound.recv().await {
        let bytes = match frame::encode(&msg) {
            Ok(bytes) => bytes,
            Err(e) => return Error::Rpc(e.into()),
        };
        if let Err(e) = transport.send(&bytes).await {
            return Error::Transport(e);
        }
    }
    Error::Rpc(nestrpc::Error::Link(LinkError::Closed))
}

/// Writes out whatever was queued before the hang-up.
async fn flush(transport: &dyn Transport, outbound: &mut mpsc::UnboundedReceiver<Message>) {
    while let Ok(msg) = outbound.try_recv() {
        let Ok(bytes) = frame::encode(&msg) else { continue };
        if transport.send(&bytes).await.is_err() {
            return;
        }
    }
}
