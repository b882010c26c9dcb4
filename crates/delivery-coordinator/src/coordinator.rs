//! Delivery coordinator.

use crate::{CoordinatorError, CoordinatorResult, DeliveryEvent};
use delivery_client::DeliveryClient;
use message_store::{
    MessageId, MessageState, MessageStore, OutboundMessage, StoreError, StoreResult,
};
use parking_lot::{Mutex, RwLock};
use request_protocol_types::CancelToken;
use send_unit::{
    DeliveryProvider, RecoveryDecision, RetryState, SendFailure, SendUnit, StepContext,
    StepError, UnitEvent, UnitOutcome, UnitState, DEFAULT_STEP_TIMEOUT,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-step round-trip timeout handed to every send unit.
    pub step_timeout: Duration,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            event_capacity: 256,
        }
    }
}

/// A message with a send in progress. The cancel flag outlives individual
/// attempts; `unit` is the latest attempt, if one was created.
struct ActiveSend {
    cancel: CancelToken,
    /// Set when the user cancelled; a shutdown halt leaves it clear.
    discard: Arc<AtomicBool>,
    unit: Option<Arc<SendUnit>>,
}

impl ActiveSend {
    /// Between attempts the latest unit has already failed, so only the
    /// shared flag matters.
    fn between_attempts(&self) -> bool {
        match &self.unit {
            Some(unit) => matches!(unit.state(), UnitState::Failed(_)),
            None => true,
        }
    }

    fn is_cancellable(&self) -> bool {
        match &self.unit {
            Some(unit) if !self.between_attempts() => unit.is_cancellable(),
            _ => !self.cancel.is_cancelled(),
        }
    }

    /// Cancel on behalf of the user; the message is deleted once the run
    /// stops. Returns whether the request can still prevent delivery.
    fn cancel(&self) -> bool {
        self.discard.store(true, Ordering::SeqCst);
        self.halt()
    }

    /// Stop the run but keep the message for a later send.
    fn halt(&self) -> bool {
        match &self.unit {
            Some(unit) if !self.between_attempts() => unit.cancel(),
            _ => {
                self.cancel.cancel();
                true
            }
        }
    }
}

/// Coordinates sends across messages.
#[derive(Clone)]
pub struct DeliveryCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn MessageStore>,
    client: DeliveryClient,
    providers: RwLock<HashMap<String, Arc<dyn DeliveryProvider>>>,
    active: Mutex<HashMap<MessageId, ActiveSend>>,
    events: broadcast::Sender<DeliveryEvent>,
    config: CoordinatorConfig,
    shut_down: AtomicBool,
}

impl DeliveryCoordinator {
    /// `client` should be attached; sends issued through a detached client
    /// fail on their first round trip.
    pub fn new(
        store: Arc<dyn MessageStore>,
        client: DeliveryClient,
        config: CoordinatorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                providers: RwLock::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                events,
                config,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn register_provider(&self, provider: Arc<dyn DeliveryProvider>) {
        let name = provider.name().to_string();
        info!(provider = %name, "Registered delivery provider");
        self.inner.providers.write().insert(name, provider);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.inner.store
    }

    /// Start sending a persisted message in the background.
    ///
    /// Fails with `AlreadySending` if a send for the message is active; the
    /// check and the registration happen under one lock.
    pub fn send(&self, message_id: &MessageId) -> CoordinatorResult<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(CoordinatorError::ShutDown);
        }

        let message = self
            .inner
            .store
            .get_message(message_id)?
            .ok_or_else(|| CoordinatorError::NotFound(message_id.clone()))?;
        if message.state == MessageState::Sent {
            return Err(CoordinatorError::AlreadySent(message_id.clone()));
        }
        let provider = self.inner.provider(&message.target.provider)?;

        let cancel = CancelToken::new();
        let discard = Arc::new(AtomicBool::new(false));
        {
            let mut active = self.inner.active.lock();
            if active.contains_key(message_id) {
                debug!(message_id = %message_id, "Send already active");
                return Err(CoordinatorError::AlreadySending(message_id.clone()));
            }
            active.insert(
                message_id.clone(),
                ActiveSend {
                    cancel: cancel.clone(),
                    discard: discard.clone(),
                    unit: None,
                },
            );
        }

        if let Err(e) = self
            .inner
            .store
            .update_message_state(message_id, &MessageState::Sending)
        {
            self.inner.active.lock().remove(message_id);
            return Err(e.into());
        }

        info!(
            message_id = %message_id,
            provider = %message.target.provider,
            "Send accepted"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run_send(message, provider, cancel, discard).await;
        });
        Ok(())
    }

    /// Cancel a message that is not yet sent. An active send stops at its
    /// next checkpoint; an idle unsent message is deleted right away.
    /// Returns false if there was nothing to cancel, or the send is already
    /// confirming and may still finish.
    pub fn cancel(&self, message_id: &MessageId) -> CoordinatorResult<bool> {
        {
            let active = self.inner.active.lock();
            if let Some(send) = active.get(message_id) {
                let cancellable = send.cancel();
                info!(message_id = %message_id, cancellable, "Cancel requested for active send");
                return Ok(cancellable);
            }
        }

        match self.inner.store.get_message(message_id)? {
            Some(message) if message.state != MessageState::Sent => {
                self.inner.store.delete_message(message_id)?;
                info!(message_id = %message_id, "Cancelled idle message");
                self.inner.emit(DeliveryEvent::Cancelled {
                    message_id: message_id.clone(),
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Cancel every active send. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = self.inner.active.lock();
        for send in active.values() {
            send.cancel();
        }
        if !active.is_empty() {
            info!(count = active.len(), "Cancelled all active sends");
        }
        active.len()
    }

    pub fn is_sending(&self, message_id: &MessageId) -> bool {
        self.inner.active.lock().contains_key(message_id)
    }

    pub fn is_sending_any(&self) -> bool {
        !self.inner.active.lock().is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Active, and cancelling would still prevent delivery.
    pub fn is_sending_and_cancellable(&self, message_id: &MessageId) -> bool {
        self.inner
            .active
            .lock()
            .get(message_id)
            .map(|send| send.is_cancellable())
            .unwrap_or(false)
    }

    /// The user re-authorized `provider`: clear the pause on its queued
    /// messages and send them again. Returns how many were resubmitted.
    pub fn authorization_completed(&self, provider: &str) -> CoordinatorResult<usize> {
        let paused: Vec<OutboundMessage> = self
            .inner
            .store
            .read_queued_messages()?
            .into_iter()
            .filter(|m| m.target.provider == provider && m.state.is_awaiting_user_action())
            .collect();

        let mut resubmitted = 0;
        for message in paused {
            self.inner
                .store
                .update_message_state(&message.id, &MessageState::queued())?;
            match self.send(&message.id) {
                Ok(()) => resubmitted += 1,
                Err(CoordinatorError::AlreadySending(_)) => {}
                Err(e) => return Err(e),
            }
        }

        info!(provider, resubmitted, "Authorization completed");
        Ok(resubmitted)
    }

    /// Tell the provider a delivered message was read.
    pub async fn mark_read(&self, message_id: &MessageId) -> CoordinatorResult<()> {
        let message = self
            .inner
            .store
            .get_message(message_id)?
            .ok_or_else(|| CoordinatorError::NotFound(message_id.clone()))?;
        let remote_id = match (&message.state, &message.remote_id) {
            (MessageState::Sent, Some(remote_id)) => remote_id.clone(),
            _ => return Err(CoordinatorError::NotDelivered(message_id.clone())),
        };
        let provider = self.inner.provider(&message.target.provider)?;

        let ctx = StepContext::new(
            self.inner.client.clone(),
            CancelToken::new(),
            self.inner.config.step_timeout,
        );
        match provider.mark_read(&ctx, &remote_id).await {
            Ok(()) => {
                debug!(message_id = %message_id, remote_id = %remote_id, "Marked read");
                Ok(())
            }
            Err(StepError::Failed(failure)) => Err(failure.into()),
            Err(StepError::Cancelled) => Err(SendFailure::TransportException(
                "mark read cancelled".into(),
            )
            .into()),
        }
    }

    /// Wait until no send is active, or `limit` elapses. Returns whether idle.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if !self.is_sending_any() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Refuse new sends and halt active ones. Halted messages stay in the
    /// store as queued; a send that is already confirming runs to the end.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let halted = {
            let active = self.inner.active.lock();
            for send in active.values() {
                send.halt();
            }
            active.len()
        };
        info!(halted, "Delivery coordinator shut down");
    }
}

impl Inner {
    fn provider(&self, name: &str) -> CoordinatorResult<Arc<dyn DeliveryProvider>> {
        self.providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownProvider(name.to_string()))
    }

    fn emit(&self, event: DeliveryEvent) {
        debug!(message_id = %event.message_id(), event = event.name(), "Delivery event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn persist(&self, message_id: &MessageId, state: &MessageState) -> StoreResult<()> {
        self.store
            .update_message_state(message_id, state)
            .inspect_err(|e| {
                error!(message_id = %message_id, state = state.label(), error = %e, "Failed to persist message state");
            })
    }

    /// Persist the outcome of a run, then return the events announcing it.
    /// If the write fails the row keeps its previous state and only an
    /// error is reported.
    fn settle(
        &self,
        message_id: &MessageId,
        state: MessageState,
        events: Vec<DeliveryEvent>,
    ) -> Vec<DeliveryEvent> {
        match self.persist(message_id, &state) {
            Ok(()) => events,
            Err(e) => vec![store_failure(message_id, &e)],
        }
    }

    async fn run_send(
        &self,
        message: OutboundMessage,
        provider: Arc<dyn DeliveryProvider>,
        cancel: CancelToken,
        discard: Arc<AtomicBool>,
    ) {
        let id = message.id.clone();
        let policy = provider.recovery_policy();
        let mut retry: Option<RetryState> = None;
        let mut last_failure: Option<SendFailure> = None;
        let mut force_refresh = false;

        // Final events go out after the active entry is gone. `delivered`
        // means the provider has the message, whatever the store says.
        let (mut final_events, delivered) = loop {
            let attempt = retry.map(|r| r.attempts).unwrap_or(0) + 1;

            let progress = {
                let events = self.events.clone();
                let id = id.clone();
                Arc::new(move |event: UnitEvent| {
                    if let UnitEvent::Progress(step) = event {
                        let _ = events.send(DeliveryEvent::Progress {
                            message_id: id.clone(),
                            step,
                        });
                    }
                })
            };
            let unit = Arc::new(
                SendUnit::new(message.clone(), provider.clone(), self.client.clone())
                    .with_cancel_token(cancel.clone())
                    .with_step_timeout(self.config.step_timeout)
                    .with_forced_refresh(force_refresh)
                    .with_listener(progress),
            );
            if let Some(send) = self.active.lock().get_mut(&id) {
                send.unit = Some(unit.clone());
            }

            if !cancel.is_cancelled() {
                self.emit(DeliveryEvent::Started {
                    message_id: id.clone(),
                    attempt,
                });
            }

            match unit.execute().await {
                Ok(UnitOutcome::Sent(receipt)) => {
                    let recorded = match &receipt.remote_id {
                        Some(remote_id) => self.store.set_remote_id(&id, remote_id),
                        None => Ok(()),
                    }
                    .and_then(|()| self.persist(&id, &MessageState::Sent));
                    break match recorded {
                        Ok(()) => {
                            info!(message_id = %id, attempt, "Message sent");
                            (
                                vec![DeliveryEvent::Finished {
                                    message_id: id.clone(),
                                    remote_id: receipt.remote_id,
                                }],
                                true,
                            )
                        }
                        Err(e) => {
                            error!(message_id = %id, error = %e, "Delivered but not recorded");
                            (vec![store_failure(&id, &e)], true)
                        }
                    };
                }
                Ok(UnitOutcome::Cancelled) if discard.load(Ordering::SeqCst) => {
                    if let Err(e) = self.store.delete_message(&id) {
                        error!(message_id = %id, error = %e, "Failed to delete cancelled message");
                    }
                    info!(message_id = %id, attempt, "Message cancelled");
                    break (
                        vec![DeliveryEvent::Cancelled {
                            message_id: id.clone(),
                        }],
                        false,
                    );
                }
                Ok(UnitOutcome::Cancelled) => {
                    info!(message_id = %id, attempt, "Send halted, message stays queued");
                    let state = MessageState::Queued {
                        last_error: last_failure.as_ref().map(SendFailure::to_delivery_error),
                    };
                    let queued = vec![DeliveryEvent::Queued {
                        message_id: id.clone(),
                    }];
                    break (self.settle(&id, state, queued), false);
                }
                Err(failure) => {
                    let state = retry.get_or_insert_with(RetryState::default);
                    state.attempts += 1;
                    let decision = policy.decide(&failure, state);
                    let will_retry = matches!(
                        decision,
                        RecoveryDecision::Retry | RecoveryDecision::RefreshCredentialsAndRetry
                    );

                    warn!(
                        message_id = %id,
                        attempt,
                        kind = %failure.kind(),
                        decision = ?decision,
                        error = %failure,
                        "Send attempt failed"
                    );

                    let error_event = DeliveryEvent::Error {
                        message_id: id.clone(),
                        failure: failure.clone(),
                        decision,
                        will_retry,
                    };
                    let queued = DeliveryEvent::Queued {
                        message_id: id.clone(),
                    };

                    match decision {
                        RecoveryDecision::Retry => {
                            self.emit(error_event);
                            force_refresh = false;
                        }
                        RecoveryDecision::RefreshCredentialsAndRetry => {
                            state.credential_refreshes += 1;
                            self.emit(error_event);
                            force_refresh = true;
                        }
                        RecoveryDecision::TreatAsSent => {
                            info!(message_id = %id, "Provider already has message, treating as sent");
                            let finished = vec![DeliveryEvent::Finished {
                                message_id: id.clone(),
                                remote_id: None,
                            }];
                            break (self.settle(&id, MessageState::Sent, finished), true);
                        }
                        RecoveryDecision::AwaitUserAction => {
                            let state = MessageState::Queued {
                                last_error: Some(
                                    failure.to_delivery_error().awaiting_user_action(),
                                ),
                            };
                            break (self.settle(&id, state, vec![error_event, queued]), false);
                        }
                        RecoveryDecision::GiveUp => {
                            let state = MessageState::Queued {
                                last_error: Some(failure.to_delivery_error()),
                            };
                            break (self.settle(&id, state, vec![error_event, queued]), false);
                        }
                    }
                    last_failure = Some(failure);
                }
            }
        };

        self.active.lock().remove(&id);

        // A user cancel that landed after the last attempt failed still wins.
        let cancelled = final_events
            .iter()
            .any(|e| matches!(e, DeliveryEvent::Cancelled { .. }));
        if !delivered && !cancelled && discard.load(Ordering::SeqCst) {
            if let Err(e) = self.store.delete_message(&id) {
                error!(message_id = %id, error = %e, "Failed to delete cancelled message");
            }
            info!(message_id = %id, "Message cancelled after failed attempt");
            final_events = vec![DeliveryEvent::Cancelled {
                message_id: id.clone(),
            }];
        }

        for event in final_events {
            self.emit(event);
        }
    }
}

/// Reported when an outcome could not be written; the row keeps its
/// previous state.
fn store_failure(message_id: &MessageId, error: &StoreError) -> DeliveryEvent {
    DeliveryEvent::Error {
        message_id: message_id.clone(),
        failure: SendFailure::TransportException(format!("failed to record outcome: {}", error)),
        decision: RecoveryDecision::GiveUp,
        will_retry: false,
    }
}
