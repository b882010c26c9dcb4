//! Scenario tests for the delivery client.
//!
//! - `harness.rs`    - scripted engine plus recording listener
//! - `replay.rs`     - detach/attach replay and saved state
//! - `resolution.rs` - waiting, cancellation and single resolution

pub(crate) mod harness;
