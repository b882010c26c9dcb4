//! Configuration, filesystem layout and logging bootstrap shared by the
//! Sendline crates and binary.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_BUFFER_TTL_SECS, DEFAULT_LOG_LEVEL, DEFAULT_MAINTENANCE_INITIAL_DELAY_SECS,
    DEFAULT_MAINTENANCE_INTERVAL_SECS, DEFAULT_MAX_RETRIES, DEFAULT_RELAY_API_URL,
    DEFAULT_STEP_TIMEOUT_SECS, DEFAULT_UPLOAD_CHUNK_SIZE, MIN_WORKER_POOL_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service};
pub use paths::Paths;
