//! Provider seam and the per-attempt step context.

use crate::{DefaultRecoveryPolicy, RecoveryPolicy, SendFailure};
use async_trait::async_trait;
use delivery_client::{ClientError, ClientEvent, DeliveryClient};
use message_store::OutboundMessage;
use parking_lot::Mutex;
use request_protocol_types::{CancelToken, RequestDescriptor, RequestId, ResponseDescriptor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of a provider step that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error(transparent)]
    Failed(#[from] SendFailure),

    /// Cancellation was observed before the next round trip.
    #[error("Cancelled")]
    Cancelled,
}

/// What the provider reports after a confirmed delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub remote_id: Option<String>,
}

/// Everything a provider step needs to talk to the network.
pub struct StepContext {
    client: DeliveryClient,
    cancel: CancelToken,
    step_timeout: Duration,
    in_flight: Mutex<Option<RequestId>>,
    round_trips: AtomicUsize,
}

impl StepContext {
    pub fn new(client: DeliveryClient, cancel: CancelToken, step_timeout: Duration) -> Self {
        Self {
            client,
            cancel,
            step_timeout,
            in_flight: Mutex::new(None),
            round_trips: AtomicUsize::new(0),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Round trips issued through this context so far.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// Identity of the round trip currently awaiting its outcome.
    pub fn in_flight(&self) -> Option<RequestId> {
        *self.in_flight.lock()
    }

    /// Submit `descriptor` and wait up to the step timeout for its outcome.
    ///
    /// A 2xx comes back as the response; anything else is classified. A
    /// timed-out request is cancelled and reported as `NoConnectivity`.
    pub async fn round_trip(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<ResponseDescriptor, StepError> {
        if self.cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        let id = descriptor.id();
        *self.in_flight.lock() = Some(id);
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        debug!(request_id = %id, url = %descriptor.url(), "Round trip");

        let result = self
            .client
            .perform_and_wait(descriptor, self.step_timeout)
            .await;
        *self.in_flight.lock() = None;

        match result {
            Ok(ClientEvent::Success(event)) => Ok(event.response),
            Ok(ClientEvent::Error(event)) => {
                let failure = SendFailure::from_response(&event.response).unwrap_or_else(|| {
                    SendFailure::UnknownResponseCode(event.response.status_code)
                });
                Err(failure.into())
            }
            Ok(ClientEvent::Cancelled(_)) => Err(StepError::Cancelled),
            Err(ClientError::Timeout(id)) => {
                self.client.cancel(&id);
                warn!(
                    request_id = %id,
                    timeout_secs = self.step_timeout.as_secs(),
                    "Step timed out"
                );
                Err(SendFailure::NoConnectivity(format!(
                    "no response within {}s",
                    self.step_timeout.as_secs()
                ))
                .into())
            }
            Err(e) => Err(SendFailure::TransportException(e.to_string()).into()),
        }
    }
}

/// A delivery destination.
///
/// Each step issues one or more round trips through the [`StepContext`].
/// Providers must send the message's `delivery_key` with every attempt so
/// resends can be deduplicated.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Make sure a usable token exists. `force` discards any cached token.
    async fn refresh_token(&self, ctx: &StepContext, force: bool) -> Result<(), StepError>;

    async fn upload_payload(
        &self,
        ctx: &StepContext,
        message: &OutboundMessage,
    ) -> Result<(), StepError>;

    async fn confirm_delivery(
        &self,
        ctx: &StepContext,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, StepError>;

    async fn mark_read(&self, ctx: &StepContext, remote_id: &str) -> Result<(), StepError>;

    fn recovery_policy(&self) -> Arc<dyn RecoveryPolicy> {
        Arc::new(DefaultRecoveryPolicy::default())
    }
}
