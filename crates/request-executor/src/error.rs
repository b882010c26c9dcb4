//! Executor error types.

use thiserror::Error;

/// Errors raised while setting up an executor. Execution itself never fails.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid executor config: {0}")]
    Config(String),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
