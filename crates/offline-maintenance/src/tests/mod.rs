//! Scenario tests for the maintenance loop.
//!
//! - `harness.rs` - coordinator over a scripted executor, manual connectivity
//! - `passes.rs`  - what a single pass resubmits and skips
//! - `timer.rs`   - initial delay, re-arm on connectivity change, stop

pub(crate) mod harness;
