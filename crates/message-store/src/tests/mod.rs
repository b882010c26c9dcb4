//! Store contract tests, run against every [`MessageStore`] implementation.
//!
//! - `contract.rs` - insert/get/update/delete, queued reads, interrupted sends

mod contract;

use crate::{InMemoryMessageStore, MessageStore, SqliteMessageStore};

/// Every store implementation, fresh and empty.
pub(crate) fn stores() -> Vec<(&'static str, Box<dyn MessageStore>)> {
    vec![
        ("memory", Box::new(InMemoryMessageStore::new())),
        ("sqlite", Box::new(SqliteMessageStore::in_memory().unwrap())),
    ]
}
