//! Terminal events.

use crate::{RequestId, ResponseDescriptor};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    Success,
    Error,
}

/// The one-time outcome of a submitted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub request_id: RequestId,
    pub kind: TerminalKind,
    pub response: ResponseDescriptor,
}

impl TerminalEvent {
    /// Success iff the response is 2xx without a transport failure.
    pub fn from_response(request_id: RequestId, response: ResponseDescriptor) -> Self {
        let kind = if response.is_success() {
            TerminalKind::Success
        } else {
            TerminalKind::Error
        };
        Self {
            request_id,
            kind,
            response,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == TerminalKind::Success
    }
}
