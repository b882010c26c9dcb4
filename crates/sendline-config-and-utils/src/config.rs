//! Configuration management for the delivery pipeline.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default relay API URL (can be overridden at compile time via SENDLINE_RELAY_API_URL).
pub const DEFAULT_RELAY_API_URL: &str = match option_env!("SENDLINE_RELAY_API_URL") {
    Some(url) => url,
    None => "https://relay.sendline.dev",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Recoverable failures retried per message before the coordinator gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Bound on a single blocking network step.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 60;

/// Interval between maintenance passes.
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 3600;

/// Delay before the first maintenance pass after (re)start.
pub const DEFAULT_MAINTENANCE_INITIAL_DELAY_SECS: u64 = 10;

/// How long an unclaimed terminal event stays buffered.
pub const DEFAULT_BUFFER_TTL_SECS: u64 = 300;

/// Size of one streamed upload chunk.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Lower bound for the request worker pool.
pub const MIN_WORKER_POOL_SIZE: usize = 4;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Base URL of the delivery relay.
    pub relay_api_url: String,
    /// Refresh token for the relay account, if the user has authorized one.
    pub relay_refresh_token: Option<String>,
    /// Max automatic resubmissions per message.
    pub max_retries: u32,
    /// Timeout for each network step of a send.
    pub step_timeout_secs: u64,
    /// Maintenance pass interval.
    pub maintenance_interval_secs: u64,
    /// Delay before the first maintenance pass.
    pub maintenance_initial_delay_secs: u64,
    /// Worker pool size override. `None` means max(cores, 4).
    pub worker_pool_size: Option<usize>,
    /// Terminal event buffer TTL.
    pub buffer_ttl_secs: u64,
    /// Upload chunk size in bytes.
    pub upload_chunk_size: usize,
    /// URL probed to decide whether the network is reachable.
    pub connectivity_probe_url: Option<String>,
    /// Interval between connectivity probes.
    pub connectivity_probe_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            relay_api_url: DEFAULT_RELAY_API_URL.to_string(),
            relay_refresh_token: None,
            max_retries: DEFAULT_MAX_RETRIES,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            maintenance_interval_secs: DEFAULT_MAINTENANCE_INTERVAL_SECS,
            maintenance_initial_delay_secs: DEFAULT_MAINTENANCE_INITIAL_DELAY_SECS,
            worker_pool_size: None,
            buffer_ttl_secs: DEFAULT_BUFFER_TTL_SECS,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            connectivity_probe_url: None,
            connectivity_probe_interval_secs: 30,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file (if any), then apply
    /// environment overrides and validate.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Apply `SENDLINE_*` environment overrides. Unparseable numbers are ignored.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("SENDLINE_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(url) = std::env::var("SENDLINE_RELAY_URL") {
            self.relay_api_url = url;
        }
        if let Ok(token) = std::env::var("SENDLINE_RELAY_REFRESH_TOKEN") {
            if !token.trim().is_empty() {
                self.relay_refresh_token = Some(token.trim().to_string());
            }
        }
        if let Some(retries) = env_number("SENDLINE_MAX_RETRIES") {
            self.max_retries = retries;
        }
        if let Some(secs) = env_number("SENDLINE_STEP_TIMEOUT_SECS") {
            self.step_timeout_secs = secs;
        }
        if let Some(secs) = env_number("SENDLINE_MAINTENANCE_INTERVAL_SECS") {
            self.maintenance_interval_secs = secs;
        }
        if let Some(size) = env_number("SENDLINE_WORKER_POOL_SIZE") {
            self.worker_pool_size = Some(size);
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        self.relay_api_url()?;
        if self.step_timeout_secs == 0 {
            return Err(CoreError::InvalidSetting {
                key: "step_timeout_secs",
                reason: "must be > 0",
            });
        }
        if self.maintenance_interval_secs == 0 {
            return Err(CoreError::InvalidSetting {
                key: "maintenance_interval_secs",
                reason: "must be > 0",
            });
        }
        if self.upload_chunk_size == 0 {
            return Err(CoreError::InvalidSetting {
                key: "upload_chunk_size",
                reason: "must be > 0",
            });
        }
        if let Some(url) = &self.connectivity_probe_url {
            Url::parse(url)?;
        }
        Ok(())
    }

    /// Get the relay URL as a parsed URL.
    pub fn relay_api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.relay_api_url).map_err(CoreError::from)
    }

    /// Effective worker pool size: the override, or max(available cores, 4).
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(MIN_WORKER_POOL_SIZE)
                .max(MIN_WORKER_POOL_SIZE)
        })
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn maintenance_initial_delay(&self) -> Duration {
        Duration::from_secs(self.maintenance_initial_delay_secs)
    }

    pub fn buffer_ttl(&self) -> Duration {
        Duration::from_secs(self.buffer_ttl_secs)
    }

    pub fn connectivity_probe_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity_probe_interval_secs)
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.relay_api_url, DEFAULT_RELAY_API_URL);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.step_timeout(), Duration::from_secs(60));
        assert_eq!(config.maintenance_interval(), Duration::from_secs(3600));
        assert_eq!(config.maintenance_initial_delay(), Duration::from_secs(10));
        assert!(config.relay_refresh_token.is_none());
    }

    #[test]
    fn test_worker_pool_size_has_floor() {
        let config = Config::default();
        assert!(config.worker_pool_size() >= MIN_WORKER_POOL_SIZE);

        let config = Config {
            worker_pool_size: Some(2),
            ..Config::default()
        };
        assert_eq!(config.worker_pool_size(), 2);
    }

    #[test]
    fn test_partial_file_uses_defaults_for_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{ "log_level": "debug", "max_retries": 5 }"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.step_timeout_secs, DEFAULT_STEP_TIMEOUT_SECS);
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{ not json").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(matches!(err, CoreError::ConfigFile(_)));
        assert!(err.to_string().starts_with("Malformed config file"));
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            relay_api_url: "https://relay.example.com".to_string(),
            maintenance_interval_secs: 120,
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.relay_api_url, "https://relay.example.com");
        assert_eq!(loaded.maintenance_interval_secs, 120);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            relay_api_url: "not a valid url".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            step_timeout_secs: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidSetting {
                key: "step_timeout_secs",
                ..
            })
        ));

        let config = Config {
            connectivity_probe_url: Some("::nope".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
