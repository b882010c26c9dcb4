//! Outcome of a single network call.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Coarse class of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Could not reach the host (DNS, refused, unreachable).
    Connect,
    /// The transport gave up waiting.
    Timeout,
    /// Reading or writing the body failed mid-transfer.
    Io,
    /// The request was malformed before anything was sent.
    InvalidRequest,
    Other,
}

/// A captured transport failure. Never propagated as an error by the
/// executor; stored on the [`ResponseDescriptor`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Mutable sink for a request's outcome.
///
/// `status_code` stays 0 until a status line was read. After execution either
/// the status/body are meaningful or `transport_error` is set, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDescriptor {
    pub status_code: u16,
    pub status_message: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub transport_error: Option<TransportError>,
}

impl ResponseDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response with a status and body, as read off the wire.
    pub fn with_status(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            body: body.into(),
            ..Self::default()
        }
    }

    /// Response recording a transport failure.
    pub fn from_transport_error(error: TransportError) -> Self {
        Self {
            transport_error: Some(error),
            ..Self::default()
        }
    }

    /// Record a transport failure, discarding anything partially read.
    pub fn fail(&mut self, error: TransportError) {
        self.status_code = 0;
        self.status_message.clear();
        self.headers.clear();
        self.body.clear();
        self.transport_error = Some(error);
    }

    /// 2xx and no transport failure.
    pub fn is_success(&self) -> bool {
        self.transport_error.is_none() && (200..300).contains(&self.status_code)
    }

    pub fn is_transport_failure(&self) -> bool {
        self.transport_error.is_some()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
