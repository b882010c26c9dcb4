//! The per-message unit of work.

use crate::{
    DeliveryProvider, DeliveryReceipt, SendFailure, StepContext, StepError, DEFAULT_STEP_TIMEOUT,
};
use delivery_client::DeliveryClient;
use message_store::OutboundMessage;
use parking_lot::Mutex;
use request_protocol_types::CancelToken;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStep {
    EnsureAuth,
    UploadPayload,
    ConfirmDelivery,
}

impl SendStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStep::EnsureAuth => "ensure_auth",
            SendStep::UploadPayload => "upload_payload",
            SendStep::ConfirmDelivery => "confirm_delivery",
        }
    }
}

impl fmt::Display for SendStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    Queued,
    Running(SendStep),
    Sent,
    Failed(SendFailure),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitEvent {
    Started,
    Progress(SendStep),
    Sent(DeliveryReceipt),
    Failed(SendFailure),
    Cancelled,
}

pub type UnitListener = Arc<dyn Fn(UnitEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Sent(DeliveryReceipt),
    Cancelled,
}

/// Drives one message through ensure-auth, upload and confirm.
///
/// Cancellation is cooperative. Before the first round trip it yields
/// `Cancelled` with no network traffic; during a step the current call
/// finishes first. Once the confirm step succeeded the unit reports `Sent`
/// whatever happened to the cancel flag.
pub struct SendUnit {
    message: OutboundMessage,
    provider: Arc<dyn DeliveryProvider>,
    client: DeliveryClient,
    cancel: CancelToken,
    step_timeout: Duration,
    force_refresh: bool,
    listener: Option<UnitListener>,
    state: Mutex<UnitState>,
    round_trips: AtomicUsize,
}

impl SendUnit {
    pub fn new(
        message: OutboundMessage,
        provider: Arc<dyn DeliveryProvider>,
        client: DeliveryClient,
    ) -> Self {
        Self {
            message,
            provider,
            client,
            cancel: CancelToken::new(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
            force_refresh: false,
            listener: None,
            state: Mutex::new(UnitState::Queued),
            round_trips: AtomicUsize::new(0),
        }
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    /// Share a cancel flag owned by the caller.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Discard any cached token in the ensure-auth step.
    pub fn with_forced_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_listener(mut self, listener: UnitListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn message(&self) -> &OutboundMessage {
        &self.message
    }

    pub fn state(&self) -> UnitState {
        self.state.lock().clone()
    }

    /// Round trips issued by the finished unit.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// True until the confirm step starts.
    pub fn is_cancellable(&self) -> bool {
        let state = self.state.lock();
        !self.cancel.is_cancelled()
            && matches!(
                *state,
                UnitState::Queued
                    | UnitState::Running(SendStep::EnsureAuth)
                    | UnitState::Running(SendStep::UploadPayload)
            )
    }

    /// Request cancellation. Returns whether the unit was still cancellable;
    /// a unit already confirming may still finish as sent.
    pub fn cancel(&self) -> bool {
        let state = self.state.lock();
        let cancellable = matches!(
            *state,
            UnitState::Queued
                | UnitState::Running(SendStep::EnsureAuth)
                | UnitState::Running(SendStep::UploadPayload)
        );
        self.cancel.cancel();
        debug!(message_id = %self.message.id, cancellable, "Send unit cancel requested");
        cancellable
    }

    /// Run the unit. A unit runs at most once.
    pub async fn execute(&self) -> Result<UnitOutcome, SendFailure> {
        {
            let mut state = self.state.lock();
            if *state != UnitState::Queued {
                return Err(SendFailure::TransportException(
                    "send unit already executed".into(),
                ));
            }
            if self.cancel.is_cancelled() {
                *state = UnitState::Cancelled;
                drop(state);
                info!(message_id = %self.message.id, "Send cancelled before start");
                self.emit(UnitEvent::Cancelled);
                return Ok(UnitOutcome::Cancelled);
            }
            *state = UnitState::Running(SendStep::EnsureAuth);
        }

        info!(
            message_id = %self.message.id,
            provider = %self.provider.name(),
            force_refresh = self.force_refresh,
            "Send started"
        );
        self.emit(UnitEvent::Started);

        let ctx = StepContext::new(self.client.clone(), self.cancel.clone(), self.step_timeout);
        let result = self.run_steps(&ctx).await;
        self.round_trips.store(ctx.round_trips(), Ordering::SeqCst);

        let (state, event, outcome) = match result {
            Ok(receipt) => (
                UnitState::Sent,
                UnitEvent::Sent(receipt.clone()),
                Ok(UnitOutcome::Sent(receipt)),
            ),
            Err(StepError::Failed(failure)) if !self.cancel.is_cancelled() => (
                UnitState::Failed(failure.clone()),
                UnitEvent::Failed(failure.clone()),
                Err(failure),
            ),
            // A failure after a cancel request still ends as cancelled.
            Err(_) => (
                UnitState::Cancelled,
                UnitEvent::Cancelled,
                Ok(UnitOutcome::Cancelled),
            ),
        };

        match &outcome {
            Ok(UnitOutcome::Sent(receipt)) => info!(
                message_id = %self.message.id,
                remote_id = ?receipt.remote_id,
                round_trips = ctx.round_trips(),
                "Send finished"
            ),
            Ok(UnitOutcome::Cancelled) => info!(
                message_id = %self.message.id,
                round_trips = ctx.round_trips(),
                "Send cancelled"
            ),
            Err(failure) => warn!(
                message_id = %self.message.id,
                kind = %failure.kind(),
                error = %failure,
                "Send failed"
            ),
        }

        *self.state.lock() = state;
        self.emit(event);
        outcome
    }

    async fn run_steps(&self, ctx: &StepContext) -> Result<DeliveryReceipt, StepError> {
        self.enter(SendStep::EnsureAuth)?;
        self.provider.refresh_token(ctx, self.force_refresh).await?;

        self.enter(SendStep::UploadPayload)?;
        self.provider.upload_payload(ctx, &self.message).await?;

        self.enter(SendStep::ConfirmDelivery)?;
        self.provider.confirm_delivery(ctx, &self.message).await
    }

    /// Checked under the state lock so `cancel()` cannot slip past the
    /// start of the confirm step.
    fn enter(&self, step: SendStep) -> Result<(), StepError> {
        {
            let mut state = self.state.lock();
            if self.cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            *state = UnitState::Running(step);
        }
        debug!(message_id = %self.message.id, step = %step, "Send step");
        self.emit(UnitEvent::Progress(step));
        Ok(())
    }

    fn emit(&self, event: UnitEvent) {
        if let Some(listener) = &self.listener {
            listener(event);
        }
    }
}
