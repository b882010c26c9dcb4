//! Delivery provider for the Sendline HTTP relay.
//!
//! Three round trips per message:
//!
//! ```text
//! POST {base}/auth/v1/token?grant_type=refresh_token   (only when no cached token)
//! PUT  {base}/v1/uploads/{delivery_key}                 payload file, streamed
//! POST {base}/v1/messages                               JSON, Idempotency-Key
//! ```
//!
//! The delivery key doubles as the upload id so a resent upload overwrites
//! the previous one instead of creating a duplicate.

mod error;
mod provider;
mod wire;

pub use error::{RelayError, RelayResult};
pub use provider::{HttpRelayProvider, RelayConfig, RELAY_PROVIDER_NAME};
pub use wire::{ConfirmRequest, ConfirmResponse, RefreshRequest, RefreshResponse};
