//! Logging configuration and initialization
//!
//! Builds the tracing subscriber from environment variables with CLI
//! overrides: stderr or file output, human-readable or JSON format, and
//! per-process unique log files for multi-instance deployments.

use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter (e.g., "debug", "info", "warn", "error")
    pub level: String,
    /// Optional log file path; stderr when absent
    pub file_path: Option<PathBuf>,
    /// Emit structured JSON instead of human-readable lines
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

/// Insert the process id before the extension: `agent.log` → `agent.<pid>.log`
fn unique_log_path(mut path: PathBuf) -> PathBuf {
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
        return path;
    };
    let pid = std::process::id();
    let file_name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{stem}.{pid}.{ext}"),
        _ => format!("{stem}.{pid}"),
    };
    path.set_file_name(file_name);
    path
}

impl LogConfig {
    /// Build a LogConfig from `RUST_LOG`, `CODEPOP_LOG_FILE`,
    /// `CODEPOP_LOG_UNIQUE`, and `CODEPOP_LOG_JSON`.
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_path = env::var("CODEPOP_LOG_FILE").ok().map(|path| {
            let path = PathBuf::from(path);
            if env::var("CODEPOP_LOG_UNIQUE").unwrap_or_default() == "true" {
                unique_log_path(path)
            } else {
                path
            }
        });

        let json_format = env::var("CODEPOP_LOG_JSON").unwrap_or_default() == "true";

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// Override values from CLI arguments
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// Initialize the global subscriber from the given configuration
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;

    let (writer, ansi) = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    let builder = fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(ansi);

    if config.json_format {
        builder.json().init();
    } else {
        builder.with_target(true).with_line_number(true).init();
    }

    Ok(())
}

/// Helper macro to log protocol lines exchanged with the companion process
#[macro_export]
macro_rules! log_wire_message {
    ($level:expr, $direction:expr, $line:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            line = %$line,
            pid = std::process::id(),
            "wire message"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_log_path_keeps_extension() {
        let pid = std::process::id();
        let path = unique_log_path(PathBuf::from("/var/log/agent.log"));
        assert_eq!(path, PathBuf::from(format!("/var/log/agent.{pid}.log")));
    }

    #[test]
    fn test_unique_log_path_without_extension() {
        let pid = std::process::id();
        let path = unique_log_path(PathBuf::from("/var/log/agent"));
        assert_eq!(path, PathBuf::from(format!("/var/log/agent.{pid}")));
    }

    #[test]
    fn test_overrides_replace_env_values() {
        let config = LogConfig::default()
            .with_overrides(Some("debug".into()), Some(PathBuf::from("/tmp/a.log")));
        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/a.log")));

        let config = LogConfig::default().with_overrides(None, None);
        assert_eq!(config.level, "info");
        assert!(config.file_path.is_none());
    }
}
