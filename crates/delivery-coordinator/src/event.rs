//! Lifecycle events.

use message_store::MessageId;
use send_unit::{RecoveryDecision, SendFailure, SendStep};

/// One message lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// Persisted as queued; waits for the maintenance loop or the user.
    Queued { message_id: MessageId },
    /// A send attempt began. `attempt` counts from 1.
    Started { message_id: MessageId, attempt: u32 },
    Progress { message_id: MessageId, step: SendStep },
    Finished {
        message_id: MessageId,
        remote_id: Option<String>,
    },
    Error {
        message_id: MessageId,
        failure: SendFailure,
        decision: RecoveryDecision,
        will_retry: bool,
    },
    /// Cancelled before it was sent; the message was deleted.
    Cancelled { message_id: MessageId },
}

impl DeliveryEvent {
    pub fn message_id(&self) -> &MessageId {
        match self {
            DeliveryEvent::Queued { message_id }
            | DeliveryEvent::Started { message_id, .. }
            | DeliveryEvent::Progress { message_id, .. }
            | DeliveryEvent::Finished { message_id, .. }
            | DeliveryEvent::Error { message_id, .. }
            | DeliveryEvent::Cancelled { message_id } => message_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeliveryEvent::Queued { .. } => "queued",
            DeliveryEvent::Started { .. } => "started",
            DeliveryEvent::Progress { .. } => "progress",
            DeliveryEvent::Finished { .. } => "finished",
            DeliveryEvent::Error { .. } => "error",
            DeliveryEvent::Cancelled { .. } => "cancelled",
        }
    }
}
