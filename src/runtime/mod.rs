//! Process supervisor layer
//!
//! Launches the installed companion binary as a child process and serializes
//! caller requests into a newline-delimited JSON protocol with per-call
//! timeouts.

mod process;
mod protocol;
mod supervisor;
mod transport;

pub use process::{ProcessError, ProcessState, ServiceProcess};
pub use protocol::LineProtocolClient;
pub use supervisor::{Runtime, RuntimeError, DEFAULT_REQUEST_TIMEOUT};
pub use transport::{PipeTransport, Transport, TransportError};
