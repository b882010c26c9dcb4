//! One-shot commands against the message database.

use anyhow::{bail, Context};
use message_store::{
    MessageId, MessageState, MessageStore, OutboundMessage, PayloadRef, SqliteMessageStore,
    Target,
};
use sendline_config_and_utils::Paths;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn open_store(paths: &Paths) -> anyhow::Result<SqliteMessageStore> {
    let path = paths.database_file();
    SqliteMessageStore::open(&path)
        .with_context(|| format!("failed to open message database {}", path.display()))
}

pub struct EnqueueRequest {
    pub provider: String,
    pub recipient: String,
    pub file: PathBuf,
    pub mime_type: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Persist a new queued message; the running pipeline picks it up on its
/// next maintenance pass.
pub fn enqueue(store: &dyn MessageStore, request: EnqueueRequest) -> anyhow::Result<OutboundMessage> {
    let path = request
        .file
        .canonicalize()
        .with_context(|| format!("payload file {} not found", request.file.display()))?;
    let metadata = std::fs::metadata(&path)?;
    if !metadata.is_file() {
        bail!("{} is not a file", path.display());
    }

    let mime_type = request
        .mime_type
        .unwrap_or_else(|| guess_mime_type(&path).to_string());
    let message = OutboundMessage::new(
        Target {
            provider: request.provider,
            recipient: request.recipient,
        },
        PayloadRef {
            path,
            mime_type,
            size_bytes: metadata.len(),
            duration_ms: request.duration_ms,
        },
    )
    .with_state(MessageState::queued());

    store.insert_message(&message)?;
    info!(
        message_id = %message.id,
        provider = %message.target.provider,
        size_bytes = message.payload.size_bytes,
        "Message enqueued"
    );
    Ok(message)
}

fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("ogg" | "opus") => "audio/ogg",
        Some("m4a" | "mp4a") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

pub fn status_lines(store: &dyn MessageStore) -> anyhow::Result<Vec<String>> {
    let messages = store.list_messages()?;
    if messages.is_empty() {
        return Ok(vec!["No messages".to_string()]);
    }
    Ok(messages
        .iter()
        .map(|m| {
            format!(
                "{}  {:<8} {:<12} {}  {}",
                m.id,
                m.target.provider,
                m.target.recipient,
                m.updated_at.format("%Y-%m-%d %H:%M:%S"),
                m.state
            )
        })
        .collect())
}

pub fn status_json(store: &dyn MessageStore) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(&store.list_messages()?)?)
}

/// Delete a message that is neither sent nor being sent.
pub fn cancel(store: &dyn MessageStore, message_id: &str) -> anyhow::Result<bool> {
    let id = MessageId::from(message_id);
    let Some(message) = store.get_message(&id)? else {
        return Ok(false);
    };
    match message.state {
        MessageState::Sent => Ok(false),
        MessageState::Sending => bail!(
            "message {} is being sent by a running pipeline; stop it or cancel there",
            id
        ),
        _ => {
            let deleted = store.delete_message(&id)?;
            info!(message_id = %id, "Message cancelled");
            Ok(deleted)
        }
    }
}
