//! Delivery coordinator.
//!
//! Owns the rule that a message has at most one active [`SendUnit`], turns
//! unit outcomes into persisted message states through the provider's
//! [`RecoveryPolicy`], and broadcasts a [`DeliveryEvent`] for every
//! transition.
//!
//! [`SendUnit`]: send_unit::SendUnit
//! [`RecoveryPolicy`]: send_unit::RecoveryPolicy

mod coordinator;
mod error;
mod event;

pub use coordinator::{CoordinatorConfig, DeliveryCoordinator};
pub use error::{CoordinatorError, CoordinatorResult};
pub use event::DeliveryEvent;

#[cfg(test)]
mod tests;
