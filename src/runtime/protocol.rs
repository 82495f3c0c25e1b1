//! Line protocol client
//!
//! Serializes caller requests into the newline-delimited JSON protocol under
//! a single-flight discipline: a mutex over the transport is the request
//! permit, so at most one request is outstanding against the companion at any
//! instant, and distinct callers execute in strict FIFO order.
//!
//! The wire format is plain line-ordered JSON with no correlation id; the
//! FIFO permit is the defining invariant. A request that times out may still
//! produce a late response line - it is discarded at the next permit
//! acquisition, never handed to the next caller.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{Level, debug, warn};

use crate::log_wire_message;
use crate::runtime::supervisor::RuntimeError;
use crate::runtime::transport::Transport;

/// Single-flight request client over a line transport
pub struct LineProtocolClient<T: Transport> {
    /// The request permit: exactly one holder at a time, FIFO queued
    transport: Mutex<T>,
}

impl<T: Transport> LineProtocolClient<T> {
    /// Create a client owning the given transport
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    /// Send one `{"request": <payload>}` line and race the next response line
    /// against the timeout.
    ///
    /// The permit is released by guard drop on every path - success, error,
    /// or timeout. Timeout cancels only this caller's wait; nothing is sent
    /// to the companion to abandon the work.
    pub async fn request(&self, payload: Value, timeout: Duration) -> Result<Value, RuntimeError> {
        // Acquire the permit; tokio's mutex queues waiters FIFO.
        let mut transport = self.transport.lock().await;

        let discarded = transport.discard_pending();
        if discarded > 0 {
            warn!(count = discarded, "discarded stale response lines");
        }

        let line = serde_json::to_string(&json!({ "request": payload }))
            .map_err(RuntimeError::Serialize)?;
        log_wire_message!(Level::DEBUG, "outbound", line);

        transport.send_line(&line).await?;

        match tokio::time::timeout(timeout, transport.next_line()).await {
            Ok(Ok(response)) => {
                log_wire_message!(Level::DEBUG, "inbound", response);
                serde_json::from_str(&response).map_err(RuntimeError::Deserialize)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(RuntimeError::RequestTimeout { timeout })
            }
        }
    }

    /// Close the underlying transport
    pub async fn close(&self) {
        let mut transport = self.transport.lock().await;
        let _ = transport.close().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
