//! Saved client state.

use crate::ClientResult;
use request_protocol_types::RequestId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a client needs to pick up where it left off: the identities it was
/// still waiting on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    pub outstanding: Vec<RequestId>,
}

impl ClientState {
    pub fn read(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write(&self, path: &Path) -> ClientResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
