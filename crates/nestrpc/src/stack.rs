//! Outstanding out-calls, innermost last.

use crate::message::Message;

/// LIFO of rpc requests sent by this side that still await a reply.
///
/// The depth is advertised to the peer with every call and is the snapshot
/// used for race detection.
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<Message>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: Message) {
        self.frames.push(call);
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.frames.pop()
    }

    /// The only call a reply may legally close.
    pub fn top(&self) -> Option<&Message> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifo_order() {
        let mut stack = CallStack::new();
        stack.push(Message::rpc(10, Vec::new()));
        stack.push(Message::rpc(20, Vec::new()));

        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top().map(Message::msg_type), Some(20));
        assert_eq!(stack.pop().map(|m| m.msg_type()), Some(20));
        assert_eq!(stack.pop().map(|m| m.msg_type()), Some(10));
        assert!(stack.pop().is_none());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_clear_resets_depth() {
        let mut stack = CallStack::new();
        stack.push(Message::rpc(1, Vec::new()));
        stack.clear();
        assert_eq!(stack.depth(), 0);
        assert!(stack.top().is_none());
    }
}
