//! Request execution.
//!
//! [`RequestExecutor`] is the seam between the dispatch engine and the
//! network. [`HttpRequestExecutor`] is the production transport;
//! [`ScriptedExecutor`] replays canned responses without touching the network.

mod error;
mod http;
mod scripted;

pub use error::{ExecutorError, ExecutorResult};
pub use http::{ExecutorConfig, HttpRequestExecutor, DEFAULT_CHUNK_SIZE};
pub use scripted::ScriptedExecutor;

use async_trait::async_trait;
use request_protocol_types::{RequestDescriptor, ResponseDescriptor};

/// Runs one descriptor to completion.
///
/// Implementations never fail outward: transport problems are recorded on
/// the returned [`ResponseDescriptor`].
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, descriptor: &RequestDescriptor) -> ResponseDescriptor;
}
