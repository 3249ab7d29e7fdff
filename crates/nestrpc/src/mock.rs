//! Test doubles for driving one channel end from the test thread.
//!
//! The test thread plays both the peer and the I/O thread: it reads what the
//! channel sent from `wire` and feeds replies and in-calls through
//! `on_message_received`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::thread::ThreadId;
use std::time::Duration;
use std::time::Instant;

use crate::channel::RpcChannel;
use crate::config::ChannelConfig;
use crate::config::RacePolicy;
use crate::config::Side;
use crate::error::Result;
use crate::link::Link;
use crate::link::LinkError;
use crate::listener::HandlerResult;
use crate::listener::Listener;
use crate::message::Message;
use crate::message::MsgType;
use crate::task::Scheduler;
use crate::task::Task;

pub(crate) const TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn recv<T>(rx: &mpsc::Receiver<T>) -> T {
    rx.recv_timeout(TIMEOUT).expect("timed out waiting on channel")
}

pub(crate) fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition never became true");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Holds posted tasks until the test runs them on its own thread.
#[derive(Default)]
pub(crate) struct ManualScheduler {
    tasks: Mutex<VecDeque<Task>>,
}

impl ManualScheduler {
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.tasks.lock().unwrap().pop_front();
            let Some(task) = task else { return ran };
            task();
            ran += 1;
        }
    }
}

impl Scheduler for ManualScheduler {
    fn post(&self, task: Task) {
        self.tasks.lock().unwrap().push_back(task);
    }
}

/// A real worker thread fed from an mpsc queue.
pub(crate) struct ThreadWorker {
    tx: mpsc::Sender<Task>,
    id: ThreadId,
}

impl ThreadWorker {
    pub fn spawn() -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Task>();
        let handle = thread::Builder::new()
            .name("test-worker".into())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
            })
            .unwrap();
        Arc::new(Self { tx, id: handle.thread().id() })
    }

    pub fn run<R, F>(&self, f: F) -> mpsc::Receiver<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.post(Box::new(move || {
            let _ = tx.send(f());
        }));
        rx
    }
}

impl Scheduler for ThreadWorker {
    fn post(&self, task: Task) {
        let _ = self.tx.send(task);
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }
}

/// Captures everything the channel sends.
pub(crate) struct RecordingLink {
    tx: mpsc::Sender<Message>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl RecordingLink {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel();
        let link = Self {
            tx,
            failing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        (Arc::new(link), rx)
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Link for RecordingLink {
    fn send(&self, msg: Message) -> std::result::Result<(), LinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        self.tx.send(msg).map_err(|_| LinkError::Closed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Message(MsgType),
    Sync(MsgType),
    Call(MsgType),
    ChannelError,
}

pub(crate) type CallFn = Box<dyn Fn(&RpcChannel, Message) -> HandlerResult<Message> + Send + Sync>;
pub(crate) type MessageFn = Box<dyn Fn(&RpcChannel, Message) -> HandlerResult<()> + Send + Sync>;

/// Records every callback, then defers to a per-test closure.
pub(crate) struct ScriptedListener {
    events: Arc<Mutex<Vec<Event>>>,
    on_call: CallFn,
    on_sync: CallFn,
    on_message: MessageFn,
}

impl ScriptedListener {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Listener for ScriptedListener {
    fn on_message(&self, channel: &RpcChannel, msg: Message) -> HandlerResult<()> {
        self.record(Event::Message(msg.msg_type()));
        (self.on_message)(channel, msg)
    }

    fn on_sync_message(&self, channel: &RpcChannel, msg: Message) -> HandlerResult<Message> {
        self.record(Event::Sync(msg.msg_type()));
        (self.on_sync)(channel, msg)
    }

    fn on_call(&self, channel: &RpcChannel, call: Message) -> HandlerResult<Message> {
        self.record(Event::Call(call.msg_type()));
        (self.on_call)(channel, call)
    }

    fn on_channel_error(&self) {
        self.record(Event::ChannelError);
    }
}

fn echo(_: &RpcChannel, msg: Message) -> HandlerResult<Message> {
    Ok(Message::reply_to(&msg, msg.payload().to_vec()))
}

pub(crate) struct HarnessBuilder {
    config: ChannelConfig,
    on_call: CallFn,
    on_sync: CallFn,
    on_message: MessageFn,
}

impl HarnessBuilder {
    pub fn policy(mut self, policy: RacePolicy) -> Self {
        self.config = self.config.race_policy(policy);
        self
    }

    pub fn on_call(
        mut self,
        f: impl Fn(&RpcChannel, Message) -> HandlerResult<Message> + Send + Sync + 'static,
    ) -> Self {
        self.on_call = Box::new(f);
        self
    }

    pub fn on_sync(
        mut self,
        f: impl Fn(&RpcChannel, Message) -> HandlerResult<Message> + Send + Sync + 'static,
    ) -> Self {
        self.on_sync = Box::new(f);
        self
    }

    pub fn on_message(
        mut self,
        f: impl Fn(&RpcChannel, Message) -> HandlerResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Box::new(f);
        self
    }

    /// Worker tasks run on a dedicated thread.
    pub fn build(self) -> Harness {
        let worker = ThreadWorker::spawn();
        self.finish(worker.clone(), Some(worker), None)
    }

    /// Worker tasks run only from [`Harness::run_tasks`].
    pub fn build_manual(self) -> Harness {
        let manual = Arc::new(ManualScheduler::default());
        self.finish(manual.clone(), None, Some(manual))
    }

    fn finish(
        self,
        scheduler: Arc<dyn Scheduler>,
        worker: Option<Arc<ThreadWorker>>,
        manual: Option<Arc<ManualScheduler>>,
    ) -> Harness {
        let events = Arc::new(Mutex::new(Vec::new()));
        let listener = Arc::new(ScriptedListener {
            events: events.clone(),
            on_call: self.on_call,
            on_sync: self.on_sync,
            on_message: self.on_message,
        });
        let (link, wire) = RecordingLink::new();
        let channel = RpcChannel::new(self.config, link.clone(), scheduler, listener);

        Harness { channel, wire, link, events, worker, manual }
    }
}

pub(crate) struct Harness {
    pub channel: RpcChannel,
    pub wire: mpsc::Receiver<Message>,
    pub link: Arc<RecordingLink>,
    events: Arc<Mutex<Vec<Event>>>,
    worker: Option<Arc<ThreadWorker>>,
    manual: Option<Arc<ManualScheduler>>,
}

impl Harness {
    pub fn builder(side: Side) -> HarnessBuilder {
        HarnessBuilder {
            config: ChannelConfig::new(format!("{:?}", side).to_lowercase(), side),
            on_call: Box::new(echo),
            on_sync: Box::new(echo),
            on_message: Box::new(|_, _| Ok(())),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn wait_for_events(&self, count: usize) -> Vec<Event> {
        wait_until(|| self.events.lock().unwrap().len() >= count);
        self.events()
    }

    /// Next message the channel put on the wire.
    pub fn next_sent(&self) -> Message {
        recv(&self.wire)
    }

    pub fn nothing_sent(&self) -> bool {
        self.wire.try_recv().is_err()
    }

    pub fn deliver(&self, msg: Message) -> Result<()> {
        self.channel.on_message_received(msg)
    }

    pub fn on_worker<R, F>(&self, f: F) -> mpsc::Receiver<R>
    where
        R: Send + 'static,
        F: FnOnce(&RpcChannel) -> R + Send + 'static,
    {
        let channel = self.channel.clone();
        let worker = self.worker.as_ref().expect("harness has no worker thread");
        worker.run(move || f(&channel))
    }

    pub fn spawn_call(&self, msg: Message) -> mpsc::Receiver<Result<Message>> {
        self.on_worker(move |c| c.call(msg))
    }

    /// Blocks until the worker thread has run everything posted so far.
    pub fn settle(&self) {
        recv(&self.on_worker(|_| ()));
    }

    pub fn pending_tasks(&self) -> usize {
        self.manual.as_ref().expect("harness has no manual scheduler").pending()
    }

    pub fn run_tasks(&self) -> usize {
        self.manual.as_ref().expect("harness has no manual scheduler").run_until_idle()
    }
}
