//! Binary installation layer
//!
//! Resolves the active companion binary version, downloads and installs
//! missing versions, and reports the installed executable's path.

mod archive;
mod installer;

pub use archive::{ExtractError, extract_bundle};
pub use installer::{BinaryInstaller, InstallError};
