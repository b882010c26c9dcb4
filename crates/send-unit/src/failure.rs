//! Delivery failure taxonomy.

use message_store::{DeliveryError, FailureKind};
use request_protocol_types::{ResponseDescriptor, TransportErrorKind};
use thiserror::Error;

/// Why a send attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// Host unreachable, or a step ran past its timeout.
    #[error("No connectivity: {0}")]
    NoConnectivity(String),

    /// 401 or 403.
    #[error("Invalid credentials (HTTP {0})")]
    InvalidCredentials(u16),

    /// 409: the provider already has this delivery key.
    #[error("Already registered")]
    AlreadyRegistered,

    /// 429.
    #[error("Rate limited")]
    RateLimited,

    /// The user must re-authorize with the provider before retrying.
    #[error("Provider authorization required: {0}")]
    ProviderAuthorizationRequired(String),

    #[error("Unknown response code {0}")]
    UnknownResponseCode(u16),

    #[error("Transport exception: {0}")]
    TransportException(String),
}

impl SendFailure {
    /// Classify a finished round trip. `None` for a 2xx response.
    pub fn from_response(response: &ResponseDescriptor) -> Option<Self> {
        if let Some(error) = &response.transport_error {
            return Some(match error.kind {
                TransportErrorKind::Connect | TransportErrorKind::Timeout => {
                    SendFailure::NoConnectivity(error.message.clone())
                }
                _ => SendFailure::TransportException(error.message.clone()),
            });
        }

        match response.status_code {
            200..=299 => None,
            401 | 403 => Some(SendFailure::InvalidCredentials(response.status_code)),
            409 => Some(SendFailure::AlreadyRegistered),
            429 => Some(SendFailure::RateLimited),
            code => Some(SendFailure::UnknownResponseCode(code)),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            SendFailure::NoConnectivity(_) => FailureKind::NoConnectivity,
            SendFailure::InvalidCredentials(_) => FailureKind::InvalidCredentials,
            SendFailure::AlreadyRegistered => FailureKind::AlreadyRegistered,
            SendFailure::RateLimited => FailureKind::RateLimited,
            SendFailure::ProviderAuthorizationRequired(_) => {
                FailureKind::ProviderAuthorizationRequired
            }
            SendFailure::UnknownResponseCode(_) => FailureKind::UnknownResponseCode,
            SendFailure::TransportException(_) => FailureKind::TransportException,
        }
    }

    /// Whether trying again later could plausibly succeed without the user.
    pub fn is_transient(&self) -> bool {
        match self {
            SendFailure::NoConnectivity(_)
            | SendFailure::RateLimited
            | SendFailure::TransportException(_) => true,
            SendFailure::UnknownResponseCode(code) => *code >= 500 || *code == 0,
            SendFailure::InvalidCredentials(_)
            | SendFailure::AlreadyRegistered
            | SendFailure::ProviderAuthorizationRequired(_) => false,
        }
    }

    pub fn to_delivery_error(&self) -> DeliveryError {
        DeliveryError::new(self.kind(), self.to_string())
    }
}
