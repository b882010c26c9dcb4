//! Send units.
//!
//! A [`SendUnit`] drives one [`OutboundMessage`] through
//! ensure-auth → upload-payload → confirm-delivery against a
//! [`DeliveryProvider`]. Every network call goes through the
//! [`DeliveryClient`] via a [`StepContext`]; failures come back classified
//! as [`SendFailure`] for the coordinator's [`RecoveryPolicy`] to judge.
//!
//! [`OutboundMessage`]: message_store::OutboundMessage
//! [`DeliveryClient`]: delivery_client::DeliveryClient

mod failure;
mod provider;
mod recovery;
mod unit;

pub use failure::SendFailure;
pub use provider::{DeliveryProvider, DeliveryReceipt, StepContext, StepError};
pub use recovery::{DefaultRecoveryPolicy, RecoveryDecision, RecoveryPolicy, RetryState};
pub use unit::{SendStep, SendUnit, UnitEvent, UnitListener, UnitOutcome, UnitState};

/// Step timeout used when none is configured.
pub const DEFAULT_STEP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
