//! Immutable description of a single network call.

use crate::CancelToken;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque identity of one physical request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(raw).map(Self)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// In-memory payload.
    Bytes {
        content_type: String,
        data: Vec<u8>,
    },
    /// Payload streamed from a file in bounded chunks.
    File {
        content_type: String,
        path: PathBuf,
    },
}

impl RequestBody {
    pub fn content_type(&self) -> &str {
        match self {
            RequestBody::Bytes { content_type, .. } | RequestBody::File { content_type, .. } => {
                content_type
            }
        }
    }
}

/// One network call: endpoint, method, headers, url params, optional body.
///
/// Built with the consuming `with_*` methods and frozen once handed to the
/// dispatch engine. The id is assigned at construction and never changes;
/// cloning keeps the id and shares the cancel token.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    id: RequestId,
    method: Method,
    url: String,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    body: Option<RequestBody>,
    cancel: CancelToken,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    /// Set a header. Names are case-insensitive; the last write wins.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Set a url-encoded query parameter. The last write wins.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_bytes(self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.with_body(RequestBody::Bytes {
            content_type: content_type.into(),
            data,
        })
    }

    pub fn with_file(self, content_type: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.with_body(RequestBody::File {
            content_type: content_type.into(),
            path: path.into(),
        })
    }

    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let data = serde_json::to_vec(value)?;
        Ok(self.with_bytes("application/json", data))
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
