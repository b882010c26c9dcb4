//! # Observability
//!
//! Logging setup shared by every Sendline process.
//!
//! Components only ever call `tracing` macros. A binary calls
//! [`init_with_config`] once at startup; after that every event is written as
//! one JSON object per line to `~/.sendline/logs/dev.jsonl` (or the configured
//! path), and optionally mirrored to stderr in a compact human format.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "sendline".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!(message_id = %id, "message queued");
//! ```

mod json_layer;
mod writer;

use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{AppendLogWriter, WriterFactory};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the process (e.g. "sendline", "sendline-maintenance").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default filter directive. `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// Optional JSONL file path. Defaults to `~/.sendline/logs/dev.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Default JSONL location, if a home directory can be resolved.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".sendline").join("logs").join("dev.jsonl"))
}

/// Initialize logging with default settings for the given service.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// If the JSONL file cannot be opened the process still gets stderr output;
/// logging never aborts startup. Calling this twice is a no-op.
pub fn init_with_config(config: LogConfig) {
    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let log_path = config.log_path.clone().or_else(default_log_path);
    let (json_layer, open_error) = match log_path.as_ref().map(AppendLogWriter::new) {
        Some(Ok(writer)) => (
            Some(
                JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer))
                    .with_filter(env_filter()),
            ),
            None,
        ),
        Some(Err(e)) => (None, Some(e.to_string())),
        None => (None, None),
    };

    // Without a file sink, stderr is the only place logs can go.
    let want_stderr = config.also_stderr || json_layer.is_none();
    let stderr_layer = want_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if !installed {
        return;
    }

    match (log_path, open_error) {
        (Some(path), None) => tracing::info!(
            service = %config.service_name,
            log_path = %path.display(),
            "observability initialized"
        ),
        (Some(path), Some(error)) => tracing::warn!(
            service = %config.service_name,
            log_path = %path.display(),
            error = %error,
            "log file unavailable, logging to stderr only"
        ),
        (None, _) => tracing::warn!(
            service = %config.service_name,
            "no home directory, logging to stderr only"
        ),
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

pub use tracing::{debug, error, info, instrument, trace, warn, Level};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_default_log_path_under_sendline_dir() {
        if let Some(path) = default_log_path() {
            assert!(path.ends_with(".sendline/logs/dev.jsonl"));
        }
    }

    #[test]
    fn parse_level_variants() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("Warning"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }
}
