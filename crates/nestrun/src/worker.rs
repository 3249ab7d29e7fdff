//! # Worker Loop
//!
//! The worker thread: a dedicated OS thread that runs posted tasks one at a
//! time, in order. Application handlers run here, and only here may a
//! channel block in `call` or `send_sync`.
//!
//! A panicking task does not take the loop down. The panic is caught, the
//! loop's panic hook runs, and the next task is served.

use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::OnceLock;
use std::thread;
use std::thread::JoinHandle;
use std::thread::ThreadId;

use nestrpc::Scheduler;
use nestrpc::Task;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;

/// Runs on the worker thread after a task panicked.
pub type PanicHook = Box<dyn Fn() + Send + Sync + 'static>;

enum Job {
    Run(Task),
    Stop,
}

/// Posting side of a worker loop. Implements [`Scheduler`].
pub struct WorkerHandle {
    name: String,
    tx: mpsc::UnboundedSender<Job>,
    thread: ThreadId,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` on the worker thread and blocks the caller until it returns.
    ///
    /// Refuses to run from the worker thread itself, which would deadlock.
    pub fn invoke<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Err(Error::Reentrant);
        }

        let (tx, rx) = oneshot::channel();
        let job = Job::Run(Box::new(move || {
            let _ = tx.send(f());
        }));
        self.tx.send(job).map_err(|_| Error::WorkerGone)?;
        rx.blocking_recv().map_err(|_| Error::WorkerGone)
    }

    fn stop(&self) {
        let _ = self.tx.send(Job::Stop);
    }
}

impl Scheduler for WorkerHandle {
    fn post(&self, task: Task) {
        if self.tx.send(Job::Run(task)).is_err() {
            warn!(worker = %self.name, "task dropped, worker stopped");
        }
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }
}

/// Owns the worker thread. Stops and joins it on shutdown or drop.
pub struct WorkerLoop {
    handle: Arc<WorkerHandle>,
    on_panic: Arc<OnceLock<PanicHook>>,
    join: Option<JoinHandle<()>>,
}

impl WorkerLoop {
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let on_panic: Arc<OnceLock<PanicHook>> = Arc::new(OnceLock::new());

        let thread_name = format!("{}-worker", name);
        let loop_name = name.clone();
        let hook = Arc::clone(&on_panic);
        let join = thread::Builder::new().name(thread_name).spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                let task = match job {
                    Job::Run(task) => task,
                    Job::Stop => break,
                };
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!(worker = %loop_name, "worker task panicked");
                    if let Some(hook) = hook.get() {
                        hook();
                    }
                }
            }
            debug!(worker = %loop_name, "worker loop stopped");
        })?;

        let handle = Arc::new(WorkerHandle {
            name,
            tx,
            thread: join.thread().id(),
        });

        Ok(Self { handle, on_panic, join: Some(join) })
    }

    pub fn handle(&self) -> Arc<WorkerHandle> {
        Arc::clone(&self.handle)
    }

    /// Installs the hook run after a task panics. Only the first one sticks.
    pub fn on_panic(&self, hook: impl Fn() + Send + Sync + 'static) {
        if self.on_panic.set(Box::new(hook)).is_err() {
            warn!(worker = %self.handle.name, "panic hook already installed");
        }
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.handle.stop();
        let Some(join) = self.join.take() else { return };
        // joining ourselves would never return
        if self.handle.is_current() {
            return;
        }
        let _ = join.join();
    }
}

impl Drop for WorkerLoop {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
