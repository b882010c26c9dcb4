//! Logging initialization.
//!
//! Thin wrapper over the `observability` package so every binary logs to
//! the same JSONL file with its own service name.

use std::path::PathBuf;

/// Initialize logging for the main `sendline` process.
///
/// ```ignore
/// init_logging("info", None);
/// tracing::info!("pipeline started");
/// ```
pub fn init_logging(level: &str, log_path: Option<PathBuf>) {
    init_logging_for_service("sendline", level, log_path);
}

/// Initialize logging with a custom service name.
pub fn init_logging_for_service(service_name: &str, level: &str, log_path: Option<PathBuf>) {
    let also_stderr = std::env::var("SENDLINE_LOG_STDERR")
        .map(|raw| !matches!(raw.trim(), "0" | "false" | "no"))
        .unwrap_or(true);

    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        log_path,
        also_stderr,
    });
}
