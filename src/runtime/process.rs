//! Process management layer
//!
//! Handles the companion process lifecycle and stderr draining, separate from
//! transport concerns. The executable is launched with a single argument
//! identifying the calling environment (`--client=<id>`).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::runtime::transport::PipeTransport;

// ============================================================================
// Process State
// ============================================================================

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has not been started yet
    NotStarted,
    /// Process is currently running
    Running { pid: u32 },
    /// Process has been stopped
    Stopped,
}

impl ProcessState {
    /// Get the process ID if the process is running
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Executable missing or not runnable
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("process not started")]
    NotStarted,

    #[error("process already started")]
    AlreadyStarted,

    #[error("stdin not available")]
    StdinNotAvailable,

    #[error("stdout not available")]
    StdoutNotAvailable,

    #[error("stderr not available")]
    StderrNotAvailable,
}

// ============================================================================
// Service Process
// ============================================================================

/// Owns one live companion process and its pipes
pub struct ServiceProcess {
    /// Path to the companion executable
    command: PathBuf,

    /// Client identifier passed as `--client=<id>`
    client_id: String,

    /// Thread-safe process state
    state: Arc<Mutex<ProcessState>>,

    /// Child handle, kept for teardown
    child: Option<Child>,

    /// Pipe transport (created when the process starts, consumed once)
    transport: Option<PipeTransport>,

    /// Stderr draining task handle
    stderr_task: Option<JoinHandle<()>>,
}

impl ServiceProcess {
    /// Create a new service process manager
    pub fn new(command: impl Into<PathBuf>, client_id: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            client_id: client_id.into(),
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            child: None,
            transport: None,
            stderr_task: None,
        }
    }

    /// Get current process state (thread-safe)
    pub fn state(&self) -> ProcessState {
        // Poisoned mutex indicates a serious bug, panic is appropriate
        self.state.lock().unwrap().clone()
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Start the companion process with a piped stdio wiring
    pub async fn start(&mut self) -> Result<(), ProcessError> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        let client_arg = format!("--client={}", self.client_id);
        info!(
            "Starting companion process: {} {}",
            self.command.display(),
            client_arg
        );

        let mut child = Command::new(&self.command)
            .arg(&client_arg)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: self.command.display().to_string(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| {
            ProcessError::Io(std::io::Error::other("failed to get process ID"))
        })?;
        info!("Companion process started with PID: {}", pid);
        *self.state.lock().unwrap() = ProcessState::Running { pid };

        // Extract stdio streams before storing the child
        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        self.transport = Some(PipeTransport::new(stdin, stdout));

        // Always drain stderr to keep the companion from blocking on it
        self.stderr_task = Some(tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let content = line.trim();
                        if !content.is_empty() {
                            debug!("companion stderr: {}", content);
                        }
                    }
                    Err(e) => {
                        error!("Failed to read companion stderr: {}", e);
                        break;
                    }
                }
            }
            trace!("ServiceProcess: stderr drain finished");
        }));

        self.child = Some(child);
        Ok(())
    }

    /// Take the pipe transport for protocol use (consumes it)
    pub fn take_transport(&mut self) -> Result<PipeTransport, ProcessError> {
        self.transport.take().ok_or(ProcessError::NotStarted)
    }

    /// Kill the companion process and reap it
    pub async fn stop(&mut self) -> Result<(), ProcessError> {
        let pid = match self.state().pid() {
            Some(pid) => pid,
            None => return Err(ProcessError::NotStarted),
        };

        info!("Stopping companion process with PID: {}", pid);

        if let Some(mut transport) = self.transport.take() {
            use crate::runtime::transport::Transport;
            let _ = transport.close().await; // Ignore errors during shutdown
        }

        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        *self.state.lock().unwrap() = ProcessState::Stopped;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
