//! Recovery policy.

use crate::SendFailure;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Resubmit right away.
    Retry,
    /// Force a token refresh, then resubmit.
    RefreshCredentialsAndRetry,
    /// Keep the message queued and pause automatic retries until the user
    /// completes authorization.
    AwaitUserAction,
    /// The provider already has it; record the message as sent.
    TreatAsSent,
    /// Stop retrying; the message stays queued with the last error.
    GiveUp,
}

/// Per-message failure counters. Reset once the message is sent or dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Failed attempts so far, including the one being judged.
    pub attempts: u32,
    pub credential_refreshes: u32,
}

/// Decides how a provider's failures are handled.
pub trait RecoveryPolicy: Send + Sync {
    fn decide(&self, failure: &SendFailure, state: &RetryState) -> RecoveryDecision;
}

#[derive(Debug, Clone)]
pub struct DefaultRecoveryPolicy {
    /// Resubmissions allowed for transient failures.
    pub max_retries: u32,
    /// Forced token refreshes allowed for invalid credentials.
    pub max_credential_refreshes: u32,
}

impl Default for DefaultRecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_credential_refreshes: 1,
        }
    }
}

impl DefaultRecoveryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

impl RecoveryPolicy for DefaultRecoveryPolicy {
    fn decide(&self, failure: &SendFailure, state: &RetryState) -> RecoveryDecision {
        match failure {
            SendFailure::AlreadyRegistered => RecoveryDecision::TreatAsSent,
            SendFailure::ProviderAuthorizationRequired(_) => RecoveryDecision::AwaitUserAction,
            SendFailure::InvalidCredentials(_) => {
                if state.credential_refreshes < self.max_credential_refreshes {
                    RecoveryDecision::RefreshCredentialsAndRetry
                } else {
                    RecoveryDecision::GiveUp
                }
            }
            failure if failure.is_transient() => {
                if state.attempts <= self.max_retries {
                    RecoveryDecision::Retry
                } else {
                    RecoveryDecision::GiveUp
                }
            }
            _ => RecoveryDecision::GiveUp,
        }
    }
}
