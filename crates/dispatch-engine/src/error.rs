//! Engine error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine was shut down and accepts no more work.
    #[error("Dispatch engine is shut down")]
    ShutDown,
}

pub type EngineResult<T> = Result<T, EngineError>;
