//! Outbound message persistence.
//!
//! [`OutboundMessage`] is the durable record the delivery pipeline drives
//! through its lifecycle. [`MessageStore`] is the minimal contract the
//! pipeline needs; [`SqliteMessageStore`] is the durable implementation and
//! [`InMemoryMessageStore`] backs tests and dry runs.

mod error;
mod memory;
mod sqlite;
mod store;
mod types;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryMessageStore;
pub use sqlite::SqliteMessageStore;
pub use store::MessageStore;
pub use types::{
    DeliveryError, FailureKind, MessageId, MessageState, OutboundMessage, PayloadRef, Target,
};

#[cfg(test)]
mod tests;
