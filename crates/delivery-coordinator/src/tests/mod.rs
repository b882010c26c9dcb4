//! Scenario tests for the delivery coordinator.
//!
//! - `harness.rs`   - scripted one- and two-trip providers, faulty store, event recorder
//! - `exclusion.rs` - one active send per message
//! - `retry.rs`     - recovery decisions and the retry budget
//! - `cancel.rs`    - cancelling idle, active and confirming sends

pub(crate) mod harness;
