//! Offline maintenance.
//!
//! A single background task that periodically, and whenever connectivity
//! changes, refreshes the push registration and hands every queued,
//! not-in-flight message back to the [`DeliveryCoordinator`]. Passes that
//! find the device offline do nothing.
//!
//! [`DeliveryCoordinator`]: delivery_coordinator::DeliveryCoordinator

mod connectivity;
mod error;
mod maintenance;
mod registrar;

pub use connectivity::{ConnectivityMonitor, HttpProbeConnectivity, ManualConnectivity};
pub use error::{MaintenanceError, MaintenanceResult};
pub use maintenance::{MaintenanceConfig, MaintenanceLoop, PassReport};
pub use registrar::PushRegistrar;

#[cfg(test)]
mod tests;
