//! SQLite store.
//!
//! One table, one row per message. The queued-with-error detail is kept as a
//! JSON column next to the plain state label so the label stays indexable.

use crate::{
    DeliveryError, MessageId, MessageState, MessageStore, OutboundMessage, PayloadRef,
    StoreError, StoreResult, Target,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SELECT_COLUMNS: &str = "id, remote_id, provider, recipient, payload_path, mime_type, \
     size_bytes, duration_ms, delivery_key, state, last_error, created_at, updated_at";

pub struct SqliteMessageStore {
    conn: Mutex<Connection>,
}

/// Row as stored, before decoding into an [`OutboundMessage`].
struct RawRow {
    id: String,
    remote_id: Option<String>,
    provider: String,
    recipient: String,
    payload_path: String,
    mime_type: String,
    size_bytes: i64,
    duration_ms: Option<i64>,
    delivery_key: String,
    state: String,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            remote_id: row.get(1)?,
            provider: row.get(2)?,
            recipient: row.get(3)?,
            payload_path: row.get(4)?,
            mime_type: row.get(5)?,
            size_bytes: row.get(6)?,
            duration_ms: row.get(7)?,
            delivery_key: row.get(8)?,
            state: row.get(9)?,
            last_error: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn decode(self) -> StoreResult<OutboundMessage> {
        let last_error: Option<DeliveryError> = self
            .last_error
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        let state = match self.state.as_str() {
            "not_sent" => MessageState::NotSent,
            "sending" => MessageState::Sending,
            "queued" => MessageState::Queued { last_error },
            "sent" => MessageState::Sent,
            "cancelled" => MessageState::Cancelled,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "message {} has unknown state {:?}",
                    self.id, other
                )))
            }
        };

        Ok(OutboundMessage {
            id: MessageId(self.id),
            remote_id: self.remote_id,
            target: Target {
                provider: self.provider,
                recipient: self.recipient,
            },
            payload: PayloadRef {
                path: PathBuf::from(self.payload_path),
                mime_type: self.mime_type,
                size_bytes: self.size_bytes.max(0) as u64,
                duration_ms: self.duration_ms.map(|d| d.max(0) as u64),
            },
            delivery_key: self.delivery_key,
            state,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

fn encode_state(state: &MessageState) -> StoreResult<(&'static str, Option<String>)> {
    let last_error = state.last_error().map(serde_json::to_string).transpose()?;
    Ok((state.label(), last_error))
}

impl SqliteMessageStore {
    /// Opens (and creates, if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        info!(path = %path.display(), "Opened message store");
        Ok(store)
    }

    pub fn in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS outbound_messages (
                id TEXT PRIMARY KEY,
                remote_id TEXT,
                provider TEXT NOT NULL,
                recipient TEXT NOT NULL,
                payload_path TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                duration_ms INTEGER,
                delivery_key TEXT NOT NULL UNIQUE,
                state TEXT NOT NULL,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_outbound_messages_state
                ON outbound_messages(state, created_at);
            "#,
        )?;
        Ok(())
    }

    fn query(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<OutboundMessage>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM outbound_messages {} ORDER BY created_at, id",
            SELECT_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, RawRow::from_row)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?.decode()?);
        }
        Ok(messages)
    }
}

impl MessageStore for SqliteMessageStore {
    fn insert_message(&self, message: &OutboundMessage) -> StoreResult<()> {
        let (state, last_error) = encode_state(&message.state)?;
        let conn = self.conn.lock();

        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM outbound_messages WHERE id = ?",
                params![message.id.as_str()],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if exists {
            return Err(StoreError::Duplicate(message.id.clone()));
        }

        conn.execute(
            "INSERT INTO outbound_messages (id, remote_id, provider, recipient, payload_path, \
             mime_type, size_bytes, duration_ms, delivery_key, state, last_error, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                message.id.as_str(),
                message.remote_id,
                message.target.provider,
                message.target.recipient,
                message.payload.path.to_string_lossy(),
                message.payload.mime_type,
                message.payload.size_bytes as i64,
                message.payload.duration_ms.map(|d| d as i64),
                message.delivery_key,
                state,
                last_error,
                message.created_at.timestamp_millis(),
                message.updated_at.timestamp_millis(),
            ],
        )?;
        debug!(message_id = %message.id, state, "Inserted message");
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> StoreResult<Option<OutboundMessage>> {
        Ok(self
            .query("WHERE id = ?", &[&id.as_str()])?
            .into_iter()
            .next())
    }

    fn update_message_state(&self, id: &MessageId, state: &MessageState) -> StoreResult<()> {
        let (label, last_error) = encode_state(state)?;
        let changed = self.conn.lock().execute(
            "UPDATE outbound_messages SET state = ?, last_error = ?, updated_at = ? WHERE id = ?",
            params![label, last_error, Utc::now().timestamp_millis(), id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        debug!(message_id = %id, state = label, "Updated message state");
        Ok(())
    }

    fn set_remote_id(&self, id: &MessageId, remote_id: &str) -> StoreResult<()> {
        let changed = self.conn.lock().execute(
            "UPDATE outbound_messages SET remote_id = ?, updated_at = ? WHERE id = ?",
            params![remote_id, Utc::now().timestamp_millis(), id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    fn delete_message(&self, id: &MessageId) -> StoreResult<bool> {
        let deleted = self.conn.lock().execute(
            "DELETE FROM outbound_messages WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(deleted > 0)
    }

    fn list_messages(&self) -> StoreResult<Vec<OutboundMessage>> {
        self.query("", &[])
    }

    fn read_queued_messages(&self) -> StoreResult<Vec<OutboundMessage>> {
        self.query("WHERE state = 'queued'", &[])
    }

    fn reset_interrupted_sends(&self) -> StoreResult<usize> {
        let reset = self.conn.lock().execute(
            "UPDATE outbound_messages SET state = 'queued', last_error = NULL, updated_at = ? \
             WHERE state = 'sending'",
            params![Utc::now().timestamp_millis()],
        )?;
        Ok(reset)
    }
}
