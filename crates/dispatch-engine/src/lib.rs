//! Request dispatch engine.
//!
//! Executes [`RequestDescriptor`]s on a bounded pool, tracks which
//! identities are running, publishes each outcome to every observer and
//! keeps it in a short-lived buffer so a component that was away can pop it
//! later.
//!
//! [`RequestDescriptor`]: request_protocol_types::RequestDescriptor

mod buffer;
mod engine;
mod error;
mod event;

pub use buffer::TerminalBuffer;
pub use engine::{DispatchEngine, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use event::{EngineEvent, ObserverId};
