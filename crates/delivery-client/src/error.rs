//! Client error types.

use dispatch_engine::EngineError;
use request_protocol_types::RequestId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Timed out waiting for request {0}")]
    Timeout(RequestId),

    /// The client is not attached, so no outcome could ever be observed.
    #[error("Client is detached from the engine")]
    Detached,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
