//! Version & binary installer
//!
//! Resolves the active version of the companion binary, installs missing
//! versions from the download endpoint, and reports the installed
//! executable's path.
//!
//! On-disk layout under the install root:
//!
//! ```text
//! active                      currently selected version (UTF-8, trimmed)
//! <version>/<arch>-<os>[.exe] the executable (cache-hit signal)
//! <version>/...               sibling files from the extracted bundle
//! ```

use std::path::{Path, PathBuf};

use semver::Version;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::binary::archive::{self, ExtractError};
use crate::net::{FetchError, ResourceFetcher};
use crate::platform::{PlatformError, PlatformTag};

/// Suffix of the transient download artifact next to the executable
const ARTIFACT_SUFFIX: &str = "download";

/// Name of the active-version pointer file under the install root
const ACTIVE_POINTER: &str = "active";

#[cfg(unix)]
const EXECUTABLE_MODE: u32 = 0o755;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while resolving or installing the companion binary
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The version endpoint returned text that is not strict semver
    #[error("invalid version: {version}")]
    InvalidVersion { version: String },

    /// Host architecture or operating system outside the supported set
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// Network or HTTP failure; propagated unchanged, never retried
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Bundle could not be unpacked (artifact is still cleaned up)
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Filesystem failure while staging the install
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Installer
// ============================================================================

/// Installs and resolves versioned companion binaries under one install root
pub struct BinaryInstaller {
    root: PathBuf,
    base_url: String,
    fetcher: ResourceFetcher,

    /// Serializes concurrent installs so two `fetch()` calls cannot race the
    /// same download/extract.
    install_lock: Mutex<()>,
}

impl BinaryInstaller {
    /// Create an installer rooted at `root`.
    ///
    /// The directory tree is created best-effort; a root that is truly
    /// unusable surfaces later as a natural install failure.
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>, fetcher: ResourceFetcher) -> Self {
        let root = root.into();
        if let Err(e) = std::fs::create_dir_all(&root) {
            debug!(root = %root.display(), error = %e, "install root creation failed, continuing");
        }
        Self {
            root,
            base_url: base_url.into(),
            fetcher,
            install_lock: Mutex::new(()),
        }
    }

    /// Resolve the executable path, installing the active version if missing.
    ///
    /// The cache probe runs first and performs no network traffic on a hit.
    /// Any I/O error during the probe degrades to a miss.
    pub async fn fetch(&self) -> Result<PathBuf, InstallError> {
        if let Some(path) = self.installed_path().await {
            debug!(path = %path.display(), "using installed binary");
            return Ok(path);
        }

        let _guard = self.install_lock.lock().await;

        // Re-probe under the lock: a concurrent caller may have finished the
        // install while this one was waiting.
        if let Some(path) = self.installed_path().await {
            return Ok(path);
        }

        self.install().await
    }

    // ─── path computation ────────────────────────────────────────────────

    fn active_path(&self) -> PathBuf {
        self.root.join(ACTIVE_POINTER)
    }

    fn version_path(&self, version: &str, tag: &PlatformTag) -> PathBuf {
        self.root.join(version).join(tag.executable_name())
    }

    // ─── cache probe ─────────────────────────────────────────────────────

    /// Read the active pointer and return the executable path if it exists on
    /// disk. The pointer alone is never trusted; existence is re-checked.
    async fn installed_path(&self) -> Option<PathBuf> {
        let version = tokio::fs::read_to_string(self.active_path()).await.ok()?;
        let version = version.trim();
        if version.is_empty() {
            return None;
        }

        let tag = PlatformTag::detect().ok()?;
        let path = self.version_path(version, &tag);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }

    // ─── install flow ────────────────────────────────────────────────────

    async fn install(&self) -> Result<PathBuf, InstallError> {
        let version = self.resolve_version().await?;
        let tag = PlatformTag::detect()?;

        let exec_path = self.version_path(&version, &tag);
        // version_path always has a parent (root/<version>/<file>)
        let version_dir = exec_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&version_dir).await?;

        let bundle_url = format!("{}/{}", self.base_url, tag.target_name());
        let artifact = version_dir.join(format!("{}.{}", tag.target_name(), ARTIFACT_SUFFIX));

        info!(version = %version, url = %bundle_url, "downloading companion binary");
        let staged = async {
            self.fetcher.fetch_to_file(&bundle_url, &artifact).await?;
            archive::extract_bundle(&artifact, &version_dir).await?;
            Ok::<_, InstallError>(())
        }
        .await;

        // The artifact never persists: remove it whether download or
        // extraction succeeded or failed, then re-raise the failure.
        match tokio::fs::remove_file(&artifact).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(artifact = %artifact.display(), error = %e, "failed to remove download artifact");
            }
        }
        staged?;

        self.set_executable(&version_dir, &tag).await?;

        tokio::fs::write(self.active_path(), &version).await?;
        info!(version = %version, path = %exec_path.display(), "companion binary installed");

        Ok(exec_path)
    }

    /// Query the version endpoint and validate the response as strict semver
    async fn resolve_version(&self) -> Result<String, InstallError> {
        let text = self.fetcher.fetch_text(&self.base_url).await?;
        let candidate = text.trim();

        match Version::parse(candidate) {
            Ok(version) => Ok(version.to_string()),
            Err(_) => Err(InstallError::InvalidVersion {
                version: candidate.to_string(),
            }),
        }
    }

    /// Mark every file extracted into the version directory executable.
    ///
    /// The bundle layout is expected to contain exactly the runnable
    /// artifacts, so no filtering is applied. Skipped entirely on Windows.
    async fn set_executable(&self, dir: &Path, tag: &PlatformTag) -> Result<(), InstallError> {
        if tag.is_windows() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_file() {
                    let perms = std::fs::Permissions::from_mode(EXECUTABLE_MODE);
                    tokio::fs::set_permissions(&path, perms).await?;
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
