//! Behaviour every store must share.

use super::stores;
use crate::{
    DeliveryError, FailureKind, MessageId, MessageState, OutboundMessage, PayloadRef, StoreError,
    Target,
};
use chrono::{Duration, Utc};
use std::path::PathBuf;

fn message(recipient: &str, age_secs: i64) -> OutboundMessage {
    let mut message = OutboundMessage::new(
        Target {
            provider: "relay".into(),
            recipient: recipient.into(),
        },
        PayloadRef {
            path: PathBuf::from(format!("/tmp/{}.ogg", recipient)),
            mime_type: "audio/ogg".into(),
            size_bytes: 512,
            duration_ms: Some(1_500),
        },
    );
    message.created_at = Utc::now() - Duration::seconds(age_secs);
    message.updated_at = message.created_at;
    message
}

#[test]
fn insert_then_get_roundtrips_fields() {
    for (name, store) in stores() {
        let msg = message("alice", 0);
        store.insert_message(&msg).unwrap();

        let loaded = store.get_message(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.target, msg.target, "{}", name);
        assert_eq!(loaded.payload, msg.payload, "{}", name);
        assert_eq!(loaded.state, MessageState::NotSent, "{}", name);
        assert!(store.get_message(&MessageId::new()).unwrap().is_none(), "{}", name);
    }
}

#[test]
fn duplicate_insert_is_rejected() {
    for (name, store) in stores() {
        let msg = message("alice", 0);
        store.insert_message(&msg).unwrap();
        assert!(
            matches!(store.insert_message(&msg), Err(StoreError::Duplicate(_))),
            "{}",
            name
        );
    }
}

#[test]
fn update_unknown_message_is_not_found() {
    for (name, store) in stores() {
        let result = store.update_message_state(&MessageId::new(), &MessageState::Sent);
        assert!(matches!(result, Err(StoreError::NotFound(_))), "{}", name);
        let result = store.set_remote_id(&MessageId::new(), "r");
        assert!(matches!(result, Err(StoreError::NotFound(_))), "{}", name);
    }
}

#[test]
fn read_queued_returns_only_queued_oldest_first() {
    for (name, store) in stores() {
        let newer = message("newer", 10).with_state(MessageState::queued());
        let older = message("older", 100).with_state(MessageState::Queued {
            last_error: Some(DeliveryError::new(FailureKind::NoConnectivity, "offline")),
        });
        let sent = message("sent", 50).with_state(MessageState::Sent);
        let fresh = message("fresh", 5);
        for m in [&newer, &older, &sent, &fresh] {
            store.insert_message(m).unwrap();
        }

        let queued: Vec<_> = store
            .read_queued_messages()
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(queued, vec![older.id.clone(), newer.id.clone()], "{}", name);
        assert_eq!(store.list_messages().unwrap().len(), 4, "{}", name);
    }
}

#[test]
fn state_transitions_are_persisted() {
    for (name, store) in stores() {
        let msg = message("alice", 0);
        store.insert_message(&msg).unwrap();

        let paused = MessageState::Queued {
            last_error: Some(
                DeliveryError::new(FailureKind::ProviderAuthorizationRequired, "reauthorize")
                    .awaiting_user_action(),
            ),
        };
        store.update_message_state(&msg.id, &paused).unwrap();
        let loaded = store.get_message(&msg.id).unwrap().unwrap();
        assert!(loaded.state.is_awaiting_user_action(), "{}", name);

        store.update_message_state(&msg.id, &MessageState::Sent).unwrap();
        let loaded = store.get_message(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.state, MessageState::Sent, "{}", name);
        assert!(loaded.state.last_error().is_none(), "{}", name);
    }
}

#[test]
fn delete_reports_whether_anything_was_removed() {
    for (name, store) in stores() {
        let msg = message("alice", 0);
        store.insert_message(&msg).unwrap();

        assert!(store.delete_message(&msg.id).unwrap(), "{}", name);
        assert!(!store.delete_message(&msg.id).unwrap(), "{}", name);
        assert!(store.get_message(&msg.id).unwrap().is_none(), "{}", name);
    }
}

#[test]
fn interrupted_sends_are_requeued() {
    for (name, store) in stores() {
        let stuck = message("stuck", 20).with_state(MessageState::Sending);
        let done = message("done", 10).with_state(MessageState::Sent);
        store.insert_message(&stuck).unwrap();
        store.insert_message(&done).unwrap();

        assert_eq!(store.reset_interrupted_sends().unwrap(), 1, "{}", name);
        let queued = store.read_queued_messages().unwrap();
        assert_eq!(queued.len(), 1, "{}", name);
        assert_eq!(queued[0].id, stuck.id, "{}", name);
        assert_eq!(store.reset_interrupted_sends().unwrap(), 0, "{}", name);
    }
}
