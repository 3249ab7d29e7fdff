//! Runtime errors.

use std::fmt;
use std::io;

use crate::transport;

#[derive(Debug)]
pub enum Error {
    /// A loop thread or its runtime could not be started.
    Spawn(io::Error),
    /// The worker loop has stopped.
    WorkerGone,
    /// A blocking hand-off to the worker was attempted from the worker itself.
    Reentrant,
    Rpc(nestrpc::Error),
    Transport(transport::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "Failed to spawn loop: {}", e),
            Self::WorkerGone => write!(f, "Worker loop has stopped"),
            Self::Reentrant => write!(f, "Blocking hand-off from the worker thread itself"),
            Self::Rpc(e) => write!(f, "RPC error: {}", e),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Spawn(e)
    }
}

impl From<nestrpc::Error> for Error {
    fn from(e: nestrpc::Error) -> Self {
        Self::Rpc(e)
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
