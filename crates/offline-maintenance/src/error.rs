//! Maintenance error types.

use message_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Push registration failed: {0}")]
    Registration(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type MaintenanceResult<T> = Result<T, MaintenanceError>;
