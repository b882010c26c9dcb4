//! Outbound message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Local identifier of an outbound message (UUID string).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who the message goes to, and through which provider.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub provider: String,
    pub recipient: String,
}

/// Reference to the payload file on disk.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PayloadRef {
    pub path: PathBuf,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Classified delivery failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoConnectivity,
    InvalidCredentials,
    AlreadyRegistered,
    RateLimited,
    ProviderAuthorizationRequired,
    UnknownResponseCode,
    TransportException,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NoConnectivity => "no_connectivity",
            FailureKind::InvalidCredentials => "invalid_credentials",
            FailureKind::AlreadyRegistered => "already_registered",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ProviderAuthorizationRequired => "provider_authorization_required",
            FailureKind::UnknownResponseCode => "unknown_response_code",
            FailureKind::TransportException => "transport_exception",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last failure recorded on a queued message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeliveryError {
    pub kind: FailureKind,
    pub message: String,
    /// Automatic retries are paused until the user acts.
    #[serde(default)]
    pub awaiting_user_action: bool,
}

impl DeliveryError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            awaiting_user_action: false,
        }
    }

    pub fn awaiting_user_action(mut self) -> Self {
        self.awaiting_user_action = true;
        self
    }
}

/// Lifecycle state of an outbound message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageState {
    NotSent,
    Sending,
    Queued { last_error: Option<DeliveryError> },
    Sent,
    Cancelled,
}

impl MessageState {
    pub fn queued() -> Self {
        MessageState::Queued { last_error: None }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MessageState::NotSent => "not_sent",
            MessageState::Sending => "sending",
            MessageState::Queued { .. } => "queued",
            MessageState::Sent => "sent",
            MessageState::Cancelled => "cancelled",
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, MessageState::Queued { .. })
    }

    pub fn last_error(&self) -> Option<&DeliveryError> {
        match self {
            MessageState::Queued { last_error } => last_error.as_ref(),
            _ => None,
        }
    }

    /// Queued, but paused until the user resolves an authorization problem.
    pub fn is_awaiting_user_action(&self) -> bool {
        self.last_error()
            .map(|e| e.awaiting_user_action)
            .unwrap_or(false)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_error() {
            Some(error) => write!(f, "{} ({}: {})", self.label(), error.kind, error.message),
            None => f.write_str(self.label()),
        }
    }
}

/// A message waiting to be, being, or having been delivered.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: MessageId,
    /// Server-side id, set once the provider acknowledged delivery.
    pub remote_id: Option<String>,
    pub target: Target,
    pub payload: PayloadRef,
    /// Stable idempotence key sent with every attempt.
    pub delivery_key: String,
    pub state: MessageState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboundMessage {
    /// A fresh, never-attempted message with a new id and delivery key.
    pub fn new(target: Target, payload: PayloadRef) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(),
            remote_id: None,
            target,
            payload,
            delivery_key: Uuid::new_v4().to_string(),
            state: MessageState::NotSent,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_state(mut self, state: MessageState) -> Self {
        self.state = state;
        self
    }
}
