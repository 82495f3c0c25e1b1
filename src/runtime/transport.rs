//! Line transport - I/O abstraction for newline-delimited message exchange
//!
//! The companion process speaks one JSON value per line over its standard
//! input/output. This module owns the pipe ends and exposes "write line" and
//! "read next line" operations without knowledge of message content.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tracing::{error, trace};

// ============================================================================
// Transport Trait
// ============================================================================

/// Errors for the pipe transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transport is disconnected")]
    Disconnected,

    #[error("channel error: {0}")]
    Channel(String),
}

/// Core transport trait for line-oriented message exchange
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one line (the terminating newline is appended by the transport)
    async fn send_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Receive the next complete line
    async fn next_line(&mut self) -> Result<String, TransportError>;

    /// Drop any lines already buffered but not yet consumed.
    ///
    /// A request that timed out may still produce a late response; draining
    /// before the next outbound write keeps it from being misattributed.
    fn discard_pending(&mut self) -> usize;

    /// Close the transport
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Pipe Transport Implementation
// ============================================================================

/// Transport over a child process's stdin/stdout pipes
#[derive(Debug)]
pub struct PipeTransport {
    /// Channel for sending lines to stdin
    stdin_sender: Option<mpsc::UnboundedSender<String>>,

    /// Channel for receiving lines from stdout
    stdout_receiver: Option<mpsc::UnboundedReceiver<String>>,

    /// Connection status
    connected: bool,
}

impl PipeTransport {
    /// Create a new PipeTransport from child process streams
    pub fn new(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        let (stdin_sender, stdin_receiver) = mpsc::unbounded_channel();
        let (stdout_sender, stdout_receiver) = mpsc::unbounded_channel();

        tokio::spawn(Self::stdin_writer_task(stdin, stdin_receiver));
        tokio::spawn(Self::stdout_reader_task(stdout, stdout_sender));

        Self {
            stdin_sender: Some(stdin_sender),
            stdout_receiver: Some(stdout_receiver),
            connected: true,
        }
    }

    /// Background task that writes newline-terminated lines to stdin
    async fn stdin_writer_task(
        mut stdin: ChildStdin,
        mut receiver: mpsc::UnboundedReceiver<String>,
    ) {
        while let Some(line) = receiver.recv().await {
            trace!("PipeTransport: writing line (length: {})", line.len());

            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                error!("Failed to write to stdin: {}", e);
                break;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                error!("Failed to write line terminator: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!("Failed to flush stdin: {}", e);
                break;
            }
        }

        trace!("PipeTransport: stdin writer task finished");
    }

    /// Background task that reads complete lines from stdout
    async fn stdout_reader_task(stdout: ChildStdout, sender: mpsc::UnboundedSender<String>) {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    trace!("PipeTransport: stdout reader reached EOF");
                    break;
                }
                Ok(_) => {
                    let content = line.trim_end_matches(['\r', '\n']).to_string();
                    if sender.send(content).is_err() {
                        trace!("PipeTransport: stdout receiver dropped, stopping reader");
                        return;
                    }
                }
                Err(e) => {
                    error!("Failed to read from stdout: {}", e);
                    break;
                }
            }
        }

        trace!("PipeTransport: stdout reader task finished");
    }
}

#[async_trait]
impl Transport for PipeTransport {
    async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let sender = self
            .stdin_sender
            .as_ref()
            .ok_or(TransportError::Disconnected)?;

        sender
            .send(line.to_string())
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let receiver = self
            .stdout_receiver
            .as_mut()
            .ok_or(TransportError::Disconnected)?;

        receiver.recv().await.ok_or(TransportError::Disconnected)
    }

    fn discard_pending(&mut self) -> usize {
        let Some(receiver) = self.stdout_receiver.as_mut() else {
            return 0;
        };

        let mut discarded = 0;
        while let Ok(line) = receiver.try_recv() {
            trace!("PipeTransport: discarding stale line: {}", line);
            discarded += 1;
        }
        discarded
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.stdin_sender.take();
        self.stdout_receiver.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

/// Mock transport for protocol tests.
///
/// Responses are pushed through a channel, so `next_line` genuinely blocks
/// when nothing has been scripted - timeout races behave as they do against a
/// live process.
#[cfg(test)]
pub(crate) struct MockTransport {
    sent_lines: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    response_sender: mpsc::UnboundedSender<String>,
    response_receiver: mpsc::UnboundedReceiver<String>,
    connected: bool,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        let (response_sender, response_receiver) = mpsc::unbounded_channel();
        Self {
            sent_lines: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
            response_sender,
            response_receiver,
            connected: true,
        }
    }

    /// Handle for scripting responses from another task
    pub fn responder(&self) -> mpsc::UnboundedSender<String> {
        self.response_sender.clone()
    }

    /// Queue a response for the next `next_line` call
    pub fn push_response(&self, line: impl Into<String>) {
        let _ = self.response_sender.send(line.into());
    }

    /// Shared view of every line sent through this transport
    pub fn sent_lines_handle(&self) -> std::sync::Arc<std::sync::Mutex<Vec<String>>> {
        std::sync::Arc::clone(&self.sent_lines)
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        self.sent_lines.lock().unwrap().push(line.to_string());
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        self.response_receiver
            .recv()
            .await
            .ok_or(TransportError::Disconnected)
    }

    fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while self.response_receiver.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================
