//! Received messages waiting for the worker thread.

use std::collections::VecDeque;

use crate::message::Message;

/// FIFO of messages handed over by the I/O side but not yet dispatched.
///
/// The container does not enforce the single-blocker rule itself; the channel
/// checks [`PendingQueue::has_blocker`] before pushing while it is mid-call.
#[derive(Debug, Default)]
pub struct PendingQueue {
    messages: VecDeque<Message>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push_back(msg);
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn blockers(&self) -> usize {
        self.messages.iter().filter(|m| m.is_blocker()).count()
    }

    pub fn has_blocker(&self) -> bool {
        self.messages.iter().any(Message::is_blocker)
    }

    /// Removes everything, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        self.messages.drain(..)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
