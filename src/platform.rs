//! Platform tag resolution
//!
//! Maps the host architecture and operating system onto the fixed set of
//! companion binary builds. Anything outside the supported enumeration is a
//! configuration error, not something to recover from.

use std::fmt;
use thiserror::Error;

/// Errors for unsupported host platforms
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("unsupported architecture: '{0}'")]
    UnsupportedArch(String),

    #[error("unsupported operating system: '{0}'")]
    UnsupportedOs(String),
}

/// Supported processor architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    I686,
    Aarch64,
}

impl Arch {
    fn as_str(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::I686 => "i686",
            Arch::Aarch64 => "aarch64",
        }
    }
}

/// Supported operating systems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Windows,
    Darwin,
    Linux,
}

impl Os {
    fn as_str(self) -> &'static str {
        match self {
            Os::Windows => "windows",
            Os::Darwin => "darwin",
            Os::Linux => "linux",
        }
    }
}

/// The `<arch>-<os>` pair identifying which build of the companion binary to
/// fetch and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformTag {
    pub arch: Arch,
    pub os: Os,
}

impl PlatformTag {
    /// Create a platform tag from explicit components
    pub fn new(arch: Arch, os: Os) -> Self {
        Self { arch, os }
    }

    /// Detect the platform tag of the running host
    pub fn detect() -> Result<Self, PlatformError> {
        Self::from_consts(std::env::consts::ARCH, std::env::consts::OS)
    }

    /// Resolve a platform tag from `std::env::consts`-style identifiers
    pub fn from_consts(arch: &str, os: &str) -> Result<Self, PlatformError> {
        let arch = match arch {
            "x86_64" => Arch::X86_64,
            "x86" => Arch::I686,
            "aarch64" => Arch::Aarch64,
            other => return Err(PlatformError::UnsupportedArch(other.to_string())),
        };

        let os = match os {
            "windows" => Os::Windows,
            "macos" => Os::Darwin,
            "linux" => Os::Linux,
            other => return Err(PlatformError::UnsupportedOs(other.to_string())),
        };

        Ok(Self { arch, os })
    }

    /// The `<arch>-<os>` string used as the bundle URL component
    pub fn target_name(&self) -> String {
        format!("{}-{}", self.arch.as_str(), self.os.as_str())
    }

    /// The on-disk executable file name: `<arch>-<os>`, with `.exe` appended
    /// only for the windows tag
    pub fn executable_name(&self) -> String {
        match self.os {
            Os::Windows => format!("{}.exe", self.target_name()),
            _ => self.target_name(),
        }
    }

    /// Whether the tag names a Windows build
    pub fn is_windows(&self) -> bool {
        self.os == Os::Windows
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target_name())
    }
}
