//! Agent configuration
//!
//! Provides [`AgentConfig`] with a builder, validation, and environment
//! fallbacks. Validation happens once at `build()`; every consumer
//! downstream can rely on a well-formed configuration.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::net::ProxyConfig;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Environment variable overriding the install root
pub const ROOT_ENV_VAR: &str = "CODEPOP_ROOT";

/// Default per-request timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default client identifier reported to the companion
pub const DEFAULT_CLIENT_ID: &str = "cli";

// ============================================================================
// Errors
// ============================================================================

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Missing required configuration field
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    /// URL does not parse or carries an unusable scheme
    #[error("invalid URL for {field}: {url} - {reason}")]
    InvalidUrl {
        field: &'static str,
        url: String,
        reason: String,
    },

    /// Timeout outside the accepted range
    #[error("invalid timeout: {timeout_ms}ms - must be greater than zero")]
    InvalidTimeout { timeout_ms: u64 },

    /// Empty client identifier
    #[error("client id must not be empty")]
    EmptyClientId,
}

// ============================================================================
// Core Configuration
// ============================================================================

/// Validated agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Directory holding installed companion versions and the active pointer
    pub install_root: PathBuf,

    /// Base URL of the version and bundle endpoints
    pub base_url: String,

    /// Client identifier passed to the companion as `--client=<id>`
    pub client_id: String,

    /// Proxy settings for downloads
    pub proxy: ProxyConfig,

    /// Per-request timeout
    pub request_timeout: Duration,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`AgentConfig`] with validation
#[derive(Debug, Default)]
pub struct AgentConfigBuilder {
    install_root: Option<PathBuf>,
    base_url: Option<String>,
    client_id: Option<String>,
    proxy_url: Option<String>,
    strict_ssl: Option<bool>,
    timeout_ms: Option<u64>,
}

impl AgentConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the install root explicitly
    pub fn install_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_root = Some(path.into());
        self
    }

    /// Set the base URL of the version and bundle endpoints
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the client identifier
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set an explicit proxy URL, taking precedence over the environment
    pub fn proxy_url(mut self, url: impl Into<Option<String>>) -> Self {
        self.proxy_url = url.into();
        self
    }

    /// Control TLS certificate verification for proxied downloads (on by
    /// default)
    pub fn strict_ssl(mut self, strict: bool) -> Self {
        self.strict_ssl = Some(strict);
        self
    }

    /// Set the per-request timeout in milliseconds
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Validate and build the configuration.
    ///
    /// The install root falls back to `CODEPOP_ROOT` when not set
    /// explicitly.
    pub fn build(self) -> Result<AgentConfig, ConfigError> {
        let install_root = match self.install_root {
            Some(path) => path,
            None => std::env::var_os(ROOT_ENV_VAR)
                .map(PathBuf::from)
                .ok_or(ConfigError::MissingField {
                    field: "install_root",
                })?,
        };

        let base_url = self.base_url.ok_or(ConfigError::MissingField {
            field: "base_url",
        })?;
        Self::validate_http_url("base_url", &base_url)?;

        if let Some(proxy) = &self.proxy_url {
            Self::validate_http_url("proxy", proxy)?;
        }

        let client_id = self
            .client_id
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());
        if client_id.is_empty() {
            return Err(ConfigError::EmptyClientId);
        }

        let timeout_ms = self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout { timeout_ms });
        }

        Ok(AgentConfig {
            install_root,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            proxy: ProxyConfig {
                url: self.proxy_url,
                strict_ssl: self.strict_ssl.unwrap_or(true),
            },
            request_timeout: Duration::from_millis(timeout_ms),
        })
    }

    fn validate_http_url(field: &'static str, raw: &str) -> Result<(), ConfigError> {
        let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
            field,
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(ConfigError::InvalidUrl {
                field,
                url: raw.to_string(),
                reason: format!("unsupported scheme: {scheme}"),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> AgentConfigBuilder {
        AgentConfigBuilder::new()
            .install_root("/tmp/codepop")
            .base_url("https://updates.example.com/bundles")
    }

    #[test]
    fn test_defaults_applied() {
        let config = base_builder().build().unwrap();
        assert_eq!(config.client_id, "cli");
        assert_eq!(config.request_timeout, Duration::from_millis(1000));
        assert!(config.proxy.url.is_none());
        // Certificate verification defaults on; it takes effect when a proxy
        // is configured.
        assert!(config.proxy.strict_ssl);
    }

    #[test]
    fn test_base_url_is_required() {
        let err = AgentConfigBuilder::new()
            .install_root("/tmp/codepop")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField { field: "base_url" }
        ));
    }

    #[test]
    fn test_trailing_slash_stripped_from_base_url() {
        let config = base_builder()
            .base_url("https://updates.example.com/bundles/")
            .build()
            .unwrap();
        assert_eq!(config.base_url, "https://updates.example.com/bundles");
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let err = base_builder()
            .base_url("ftp://updates.example.com")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { field: "base_url", .. }));
    }

    #[test]
    fn test_rejects_unparseable_proxy() {
        let err = base_builder()
            .proxy_url(Some("not a url".to_string()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { field: "proxy", .. }));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = base_builder().timeout_ms(0).build().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidTimeout { timeout_ms: 0 }
        ));
    }

    #[test]
    fn test_rejects_empty_client_id() {
        let err = base_builder().client_id("").build().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyClientId));
    }

    #[test]
    fn test_strict_ssl_opt_out() {
        let config = base_builder().strict_ssl(false).build().unwrap();
        assert!(!config.proxy.strict_ssl);
    }

    #[test]
    fn test_explicit_values_pass_through() {
        let config = base_builder()
            .client_id("editor")
            .proxy_url(Some("http://proxy.internal:3128".to_string()))
            .strict_ssl(true)
            .timeout_ms(2500)
            .build()
            .unwrap();
        assert_eq!(config.client_id, "editor");
        assert_eq!(
            config.proxy.url.as_deref(),
            Some("http://proxy.internal:3128")
        );
        assert!(config.proxy.strict_ssl);
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
    }
}
