//! Worker-loop task posting.

/// A unit of work for the worker loop.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The worker thread's event loop, abstracted.
///
/// Tasks run one at a time, in posting order, on a single thread. The channel
/// posts dispatch work here whenever the I/O side receives something while no
/// call is waiting for it.
pub trait Scheduler: Send + Sync + 'static {
    fn post(&self, task: Task);

    /// Whether the caller is running on the worker thread. Blocking operations
    /// refuse to run anywhere else.
    fn is_current(&self) -> bool {
        true
    }
}
