//! Coordinator error types.

use message_store::{MessageId, StoreError};
use send_unit::SendFailure;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Message not found: {0}")]
    NotFound(MessageId),

    #[error("Message {0} is already being sent")]
    AlreadySending(MessageId),

    #[error("Message {0} was already sent")]
    AlreadySent(MessageId),

    #[error("Message {0} has not been delivered yet")]
    NotDelivered(MessageId),

    #[error("No provider registered as {0:?}")]
    UnknownProvider(String),

    #[error("Send failed: {0}")]
    Send(#[from] SendFailure),

    #[error("Coordinator is shut down")]
    ShutDown,
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
