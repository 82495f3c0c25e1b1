//! Runtime supervisor
//!
//! Owns the companion binary end to end: resolves and installs it through
//! the [`BinaryInstaller`], launches it as a child process, and exposes the
//! single-flight request API over its pipes.
//!
//! Lifecycle: `Uninitialized -> Starting -> Ready -> Terminated`. After
//! `deinit()` every further `request()` fails fast instead of writing to a
//! closed pipe. No operation retries; every failure surfaces to the
//! immediate caller, which decides about re-download or re-spawn.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::binary::{BinaryInstaller, InstallError};
use crate::runtime::process::{ProcessError, ServiceProcess};
use crate::runtime::protocol::LineProtocolClient;
use crate::runtime::transport::{PipeTransport, TransportError};

/// Default per-call timeout for protocol requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Timeout for the best-effort deinit request
const DEINIT_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by the runtime supervisor
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Binary resolution or installation failed
    #[error(transparent)]
    Install(#[from] InstallError),

    /// Companion process could not be started or stopped
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Pipe-level failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No response line arrived within the per-call timeout
    #[error("request timeout after {timeout:?}")]
    RequestTimeout { timeout: Duration },

    /// `request()` before `init()`
    #[error("runtime not started")]
    NotStarted,

    /// `request()` after `deinit()`
    #[error("runtime terminated")]
    Terminated,

    #[error("failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to parse response: {0}")]
    Deserialize(#[source] serde_json::Error),
}

// ============================================================================
// Runtime
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Uninitialized,
    Ready,
    Terminated,
}

/// Supervisor for one companion process
pub struct Runtime {
    installer: BinaryInstaller,
    client_id: String,
    request_timeout: Duration,

    process: Mutex<Option<ServiceProcess>>,
    client: Mutex<Option<LineProtocolClient<PipeTransport>>>,
    state: Mutex<LifecycleState>,
}

impl Runtime {
    /// Create an uninitialized runtime
    pub fn new(installer: BinaryInstaller, client_id: impl Into<String>) -> Self {
        Self {
            installer,
            client_id: client_id.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            process: Mutex::new(None),
            client: Mutex::new(None),
            state: Mutex::new(LifecycleState::Uninitialized),
        }
    }

    /// Override the default per-call timeout used by [`Runtime::request`]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Resolve the companion binary (downloading it if missing), spawn it,
    /// and wire the protocol client to its pipes.
    pub async fn init(&self) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        match *state {
            LifecycleState::Uninitialized => {}
            LifecycleState::Ready => return Ok(()),
            LifecycleState::Terminated => return Err(RuntimeError::Terminated),
        }

        let executable = self.installer.fetch().await?;
        debug!(path = %executable.display(), "companion binary resolved");

        let mut process = ServiceProcess::new(&executable, &self.client_id);
        process.start().await?;
        let transport = process.take_transport()?;

        *self.process.lock().await = Some(process);
        *self.client.lock().await = Some(LineProtocolClient::new(transport));
        *state = LifecycleState::Ready;

        info!("runtime ready");
        Ok(())
    }

    /// Issue one protocol request with the configured timeout
    pub async fn request(&self, payload: Value) -> Result<Value, RuntimeError> {
        self.request_with_timeout(payload, self.request_timeout)
            .await
    }

    /// Issue one protocol request, failing with [`RuntimeError::RequestTimeout`]
    /// if no response line arrives in time.
    pub async fn request_with_timeout(
        &self,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, RuntimeError> {
        match *self.state.lock().await {
            LifecycleState::Ready => {}
            LifecycleState::Uninitialized => return Err(RuntimeError::NotStarted),
            LifecycleState::Terminated => return Err(RuntimeError::Terminated),
        }

        let client = self.client.lock().await;
        let client = client.as_ref().ok_or(RuntimeError::Terminated)?;
        client.request(payload, timeout).await
    }

    /// Send a best-effort `{"deinit": {}}` request and terminate.
    ///
    /// A failing deinit request is swallowed; the companion is killed either
    /// way, and further `request()` calls fail fast.
    pub async fn deinit(&self) {
        {
            let mut state = self.state.lock().await;
            if *state != LifecycleState::Ready {
                *state = LifecycleState::Terminated;
                return;
            }
            *state = LifecycleState::Terminated;
        }

        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.request(json!({ "deinit": {} }), DEINIT_TIMEOUT).await {
                warn!(error = %e, "deinit request failed");
            }
            client.close().await;
        }

        if let Some(mut process) = self.process.lock().await.take() {
            if let Err(e) = process.stop().await {
                warn!(error = %e, "failed to stop companion process");
            }
        }

        info!("runtime terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ProxyConfig, ResourceFetcher};

    /// Installer over a pre-populated root so no network is involved
    fn offline_installer(root: &std::path::Path, body: &str) -> BinaryInstaller {
        let tag = crate::platform::PlatformTag::detect().unwrap();
        let version_dir = root.join("1.0.0");
        std::fs::create_dir_all(&version_dir).unwrap();

        let exec = version_dir.join(tag.executable_name());
        std::fs::write(&exec, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&exec, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        std::fs::write(root.join("active"), "1.0.0").unwrap();

        let fetcher = ResourceFetcher::new(&ProxyConfig::default()).unwrap();
        BinaryInstaller::new(root, "http://127.0.0.1:9/unreachable", fetcher)
    }

    /// A companion stand-in that answers every request line with a JSON echo
    const ECHO_COMPANION: &str = "#!/bin/sh\nwhile IFS= read -r line; do\n  printf '{\"echoed\":true}\\n'\ndone\n";

    #[tokio::test]
    async fn test_request_before_init_fails_fast() {
        let root = tempfile::tempdir().unwrap();
        let installer = offline_installer(root.path(), ECHO_COMPANION);
        let runtime = Runtime::new(installer, "cli");

        let err = runtime.request(json!({"state": {}})).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotStarted));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_init_request_deinit_cycle() {
        let root = tempfile::tempdir().unwrap();
        let installer = offline_installer(root.path(), ECHO_COMPANION);
        let runtime = Runtime::new(installer, "cli");

        runtime.init().await.unwrap();

        let response = runtime.request(json!({"state": {}})).await.unwrap();
        assert_eq!(response, json!({"echoed": true}));

        runtime.deinit().await;

        let err = runtime.request(json!({"state": {}})).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Terminated));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_request_timeout_against_silent_companion() {
        let root = tempfile::tempdir().unwrap();
        // Companion that reads but never answers.
        let installer = offline_installer(root.path(), "#!/bin/sh\ncat >/dev/null\n");
        let runtime = Runtime::new(installer, "cli");

        runtime.init().await.unwrap();

        let err = runtime
            .request_with_timeout(json!({"never": {}}), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::RequestTimeout { .. }));

        runtime.deinit().await;
    }

    #[tokio::test]
    async fn test_init_with_missing_binary_surfaces_spawn_error() {
        let root = tempfile::tempdir().unwrap();
        let installer = offline_installer(root.path(), ECHO_COMPANION);

        // Break the installed executable after the installer probe target.
        let tag = crate::platform::PlatformTag::detect().unwrap();
        let exec = root.path().join("1.0.0").join(tag.executable_name());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Remove the exec bit so spawn fails with a permission error.
            std::fs::set_permissions(&exec, std::fs::Permissions::from_mode(0o644)).unwrap();
        }
        #[cfg(not(unix))]
        std::fs::remove_file(&exec).ok();

        let runtime = Runtime::new(installer, "cli");
        let result = runtime.init().await;
        #[cfg(unix)]
        assert!(matches!(
            result,
            Err(RuntimeError::Process(ProcessError::Spawn { .. }))
        ));
        #[cfg(not(unix))]
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_deinit_without_init_is_quiet() {
        let root = tempfile::tempdir().unwrap();
        let installer = offline_installer(root.path(), ECHO_COMPANION);
        let runtime = Runtime::new(installer, "cli");

        runtime.deinit().await;
        let err = runtime.request(json!({})).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Terminated));
    }
}
