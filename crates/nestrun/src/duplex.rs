//! In-memory transport pair.

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;

type Wire = mpsc::UnboundedSender<Vec<u8>>;

/// One end of a crossed pair of tokio mpsc queues.
///
/// Buffers sent on one end appear on the other end's `recv()`. Closing or
/// dropping one end makes the other's `recv()` return `None` once it has read
/// what was already sent, and its `send()` fail.
pub struct DuplexTransport {
    out: Mutex<Option<Wire>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl DuplexTransport {
    /// Creates two ends connected to each other.
    pub fn pair() -> (Self, Self) {
        let (to_b, from_a) = mpsc::unbounded_channel();
        let (to_a, from_b) = mpsc::unbounded_channel();
        (Self::end(to_b, from_b), Self::end(to_a, from_a))
    }

    fn end(out: Wire, inbox: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            out: Mutex::new(Some(out)),
            inbox: Mutex::new(inbox),
        }
    }

    /// Hangs up the sending half. The peer reads what was already sent and
    /// then sees the end of the stream; this end can still receive.
    pub async fn close(&self) {
        self.out.lock().await.take();
    }
}

#[async_trait::async_trait]
impl Transport for DuplexTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        let out = self.out.lock().await;
        let Some(wire) = out.as_ref() else {
            return Err(transport::Error::ConnectionLost("closed locally".into()));
        };
        wire.send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("peer hung up".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        Ok(self.inbox.lock().await.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_crossed() {
        let (a, b) = DuplexTransport::pair();

        a.send(b"ping").await.unwrap();
        b.send(b"pong").await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Some(b"ping".to_vec()));
        assert_eq!(a.recv().await.unwrap(), Some(b"pong".to_vec()));
    }

    #[tokio::test]
    async fn test_drop_closes_peer() {
        let (a, b) = DuplexTransport::pair();
        drop(b);

        assert!(a.send(b"lost").await.is_err());
        assert_eq!(a.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_delivers_then_hangs_up() {
        let (a, b) = DuplexTransport::pair();

        a.send(b"last").await.unwrap();
        a.close().await;

        assert!(a.send(b"after").await.is_err());
        assert_eq!(b.recv().await.unwrap(), Some(b"last".to_vec()));
        assert_eq!(b.recv().await.unwrap(), None);

        b.send(b"back").await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Some(b"back".to_vec()));
    }
}
