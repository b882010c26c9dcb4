//! In-memory store.

use crate::{MessageId, MessageState, MessageStore, OutboundMessage, StoreError, StoreResult};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<HashMap<MessageId, OutboundMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut messages: Vec<OutboundMessage>) -> Vec<OutboundMessage> {
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        messages
    }

    fn modify(
        &self,
        id: &MessageId,
        f: impl FnOnce(&mut OutboundMessage),
    ) -> StoreResult<()> {
        let mut messages = self.messages.write();
        let message = messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        f(message);
        message.updated_at = Utc::now();
        Ok(())
    }
}

impl MessageStore for InMemoryMessageStore {
    fn insert_message(&self, message: &OutboundMessage) -> StoreResult<()> {
        let mut messages = self.messages.write();
        if messages.contains_key(&message.id) {
            return Err(StoreError::Duplicate(message.id.clone()));
        }
        messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> StoreResult<Option<OutboundMessage>> {
        Ok(self.messages.read().get(id).cloned())
    }

    fn update_message_state(&self, id: &MessageId, state: &MessageState) -> StoreResult<()> {
        self.modify(id, |message| message.state = state.clone())
    }

    fn set_remote_id(&self, id: &MessageId, remote_id: &str) -> StoreResult<()> {
        self.modify(id, |message| message.remote_id = Some(remote_id.to_string()))
    }

    fn delete_message(&self, id: &MessageId) -> StoreResult<bool> {
        Ok(self.messages.write().remove(id).is_some())
    }

    fn list_messages(&self) -> StoreResult<Vec<OutboundMessage>> {
        Ok(Self::sorted(self.messages.read().values().cloned().collect()))
    }

    fn read_queued_messages(&self) -> StoreResult<Vec<OutboundMessage>> {
        let queued = self
            .messages
            .read()
            .values()
            .filter(|m| m.state.is_queued())
            .cloned()
            .collect();
        Ok(Self::sorted(queued))
    }

    fn reset_interrupted_sends(&self) -> StoreResult<usize> {
        let mut messages = self.messages.write();
        let mut reset = 0;
        for message in messages.values_mut() {
            if message.state == MessageState::Sending {
                message.state = MessageState::queued();
                message.updated_at = Utc::now();
                reset += 1;
            }
        }
        Ok(reset)
    }
}
