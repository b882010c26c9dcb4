//! Client-level callbacks.

use request_protocol_types::{RequestId, TerminalEvent, TerminalKind};
use std::sync::Arc;

/// Resolution of one outstanding request. Delivered once per identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Success(TerminalEvent),
    Error(TerminalEvent),
    Cancelled(RequestId),
}

impl ClientEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            ClientEvent::Success(event) | ClientEvent::Error(event) => event.request_id,
            ClientEvent::Cancelled(id) => *id,
        }
    }

    pub fn terminal(&self) -> Option<&TerminalEvent> {
        match self {
            ClientEvent::Success(event) | ClientEvent::Error(event) => Some(event),
            ClientEvent::Cancelled(_) => None,
        }
    }
}

impl From<TerminalEvent> for ClientEvent {
    fn from(event: TerminalEvent) -> Self {
        match event.kind {
            TerminalKind::Success => ClientEvent::Success(event),
            TerminalKind::Error => ClientEvent::Error(event),
        }
    }
}

/// Callback invoked for every resolution, from the client's pump task.
pub type ClientListener = Arc<dyn Fn(ClientEvent) + Send + Sync>;
