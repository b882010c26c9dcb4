//! Wire-agnostic description of network calls.
//!
//! - [`RequestDescriptor`]: one immutable network call with a stable [`RequestId`]
//! - [`ResponseDescriptor`]: what came back (or the transport failure)
//! - [`TerminalEvent`]: the one-time success/error outcome for a request id
//! - [`CancelToken`]: monotonic cooperative cancellation flag

mod cancel;
mod descriptor;
mod event;
mod response;

pub use cancel::CancelToken;
pub use descriptor::{Method, RequestBody, RequestDescriptor, RequestId};
pub use event::{TerminalEvent, TerminalKind};
pub use response::{ResponseDescriptor, TransportError, TransportErrorKind};
