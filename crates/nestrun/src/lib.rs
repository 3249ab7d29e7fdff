//! # NestRun
//!
//! Threads and plumbing for hosting a [`nestrpc::RpcChannel`] over a byte
//! transport: a worker loop for application code, an I/O loop for the wire,
//! and an [`Endpoint`] that wires them together.

pub mod duplex;
pub mod endpoint;
pub mod error;
pub mod io;
pub mod logging;
pub mod transport;
pub mod worker;

pub use duplex::DuplexTransport;
pub use endpoint::Endpoint;
pub use endpoint::EndpointBuilder;
pub use error::Error;
pub use error::Result;
pub use transport::Transport;
pub use worker::WorkerHandle;
pub use worker::WorkerLoop;
