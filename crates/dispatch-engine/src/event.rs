//! Events published by the engine.

use request_protocol_types::{RequestId, TerminalEvent};
use std::fmt;

/// What observers receive for a submitted request. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Terminal(TerminalEvent),
    /// The request was cancelled before it completed; no terminal event follows.
    Cancelled(RequestId),
}

impl EngineEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            EngineEvent::Terminal(event) => event.request_id,
            EngineEvent::Cancelled(id) => *id,
        }
    }
}

/// Handle returned by [`crate::DispatchEngine::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}
