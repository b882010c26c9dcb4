//! Delivery client.
//!
//! The component feature code talks to. It remembers which of its requests
//! are still outstanding, survives being detached from the engine and, on
//! re-attach, replays whatever finished while it was away.

mod client;
mod error;
mod event;
mod state;

pub use client::DeliveryClient;
pub use error::{ClientError, ClientResult};
pub use event::{ClientEvent, ClientListener};
pub use state::ClientState;

#[cfg(test)]
mod tests;
