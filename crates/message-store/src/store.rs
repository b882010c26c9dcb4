//! Persistence contract used by the delivery pipeline.

use crate::{MessageId, MessageState, OutboundMessage, StoreResult};

/// Durable home of outbound messages.
///
/// Calls are short and synchronous; async callers invoke them inline.
pub trait MessageStore: Send + Sync {
    /// Fails with [`crate::StoreError::Duplicate`] if the id exists.
    fn insert_message(&self, message: &OutboundMessage) -> StoreResult<()>;

    fn get_message(&self, id: &MessageId) -> StoreResult<Option<OutboundMessage>>;

    /// Fails with [`crate::StoreError::NotFound`] if the id is unknown.
    fn update_message_state(&self, id: &MessageId, state: &MessageState) -> StoreResult<()>;

    fn set_remote_id(&self, id: &MessageId, remote_id: &str) -> StoreResult<()>;

    /// Returns whether a message was deleted.
    fn delete_message(&self, id: &MessageId) -> StoreResult<bool>;

    /// All messages, oldest first.
    fn list_messages(&self) -> StoreResult<Vec<OutboundMessage>>;

    /// Messages in the `Queued` state, oldest first.
    fn read_queued_messages(&self) -> StoreResult<Vec<OutboundMessage>>;

    /// Move messages left in `Sending` by a previous process back to
    /// `Queued`. Returns how many were reset.
    fn reset_interrupted_sends(&self) -> StoreResult<usize>;
}
