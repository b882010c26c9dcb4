//! Test harness for coordinator scenarios.

use crate::{CoordinatorConfig, DeliveryCoordinator, DeliveryEvent};
use async_trait::async_trait;
use delivery_client::DeliveryClient;
use dispatch_engine::{DispatchEngine, EngineConfig};
use message_store::{
    InMemoryMessageStore, MessageId, MessageState, MessageStore, OutboundMessage, PayloadRef,
    StoreError, StoreResult, Target,
};
use parking_lot::Mutex;
use request_executor::ScriptedExecutor;
use request_protocol_types::RequestDescriptor;
use send_unit::{
    DefaultRecoveryPolicy, DeliveryProvider, DeliveryReceipt, RecoveryPolicy, SendFailure,
    StepContext, StepError,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

pub const PROVIDER: &str = "test";
pub const WAIT: Duration = Duration::from_secs(3);

/// Uploads with `PUT /uploads/{key}` and confirms with `POST /messages`.
/// A single-trip provider skips the upload.
///
/// A 412 on confirm means the user has to re-authorize. The confirm body,
/// if any, is the remote id.
pub struct TestProvider {
    policy: Arc<DefaultRecoveryPolicy>,
    uploads: bool,
    forced_refreshes: AtomicUsize,
}

impl TestProvider {
    pub fn two_trip(policy: DefaultRecoveryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            uploads: true,
            forced_refreshes: AtomicUsize::new(0),
        }
    }

    pub fn one_trip(policy: DefaultRecoveryPolicy) -> Self {
        Self {
            uploads: false,
            ..Self::two_trip(policy)
        }
    }

    pub fn forced_refreshes(&self) -> usize {
        self.forced_refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryProvider for TestProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn refresh_token(&self, _ctx: &StepContext, force: bool) -> Result<(), StepError> {
        if force {
            self.forced_refreshes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn upload_payload(
        &self,
        ctx: &StepContext,
        message: &OutboundMessage,
    ) -> Result<(), StepError> {
        if !self.uploads {
            return Ok(());
        }
        ctx.round_trip(RequestDescriptor::put(format!(
            "https://provider.test/uploads/{}",
            message.delivery_key
        )))
        .await?;
        Ok(())
    }

    async fn confirm_delivery(
        &self,
        ctx: &StepContext,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, StepError> {
        let request = RequestDescriptor::post("https://provider.test/messages")
            .with_header("Idempotency-Key", message.delivery_key.clone());
        let response = match ctx.round_trip(request).await {
            Err(StepError::Failed(SendFailure::UnknownResponseCode(412))) => {
                return Err(SendFailure::ProviderAuthorizationRequired("reauthorize".into()).into())
            }
            other => other?,
        };
        let body = response.body_text();
        Ok(DeliveryReceipt {
            remote_id: (!body.is_empty()).then_some(body),
        })
    }

    async fn mark_read(&self, ctx: &StepContext, remote_id: &str) -> Result<(), StepError> {
        ctx.round_trip(RequestDescriptor::post(format!(
            "https://provider.test/read/{}",
            remote_id
        )))
        .await?;
        Ok(())
    }

    fn recovery_policy(&self) -> Arc<dyn RecoveryPolicy> {
        self.policy.clone()
    }
}

/// In-memory store whose writes of the `Sent` state can be made to fail.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryMessageStore,
    fail_sent: AtomicBool,
}

impl FaultyStore {
    pub fn fail_sent_writes(&self, fail: bool) {
        self.fail_sent.store(fail, Ordering::SeqCst);
    }
}

impl MessageStore for FaultyStore {
    fn insert_message(&self, message: &OutboundMessage) -> StoreResult<()> {
        self.inner.insert_message(message)
    }

    fn get_message(&self, id: &MessageId) -> StoreResult<Option<OutboundMessage>> {
        self.inner.get_message(id)
    }

    fn update_message_state(&self, id: &MessageId, state: &MessageState) -> StoreResult<()> {
        if *state == MessageState::Sent && self.fail_sent.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("disk full".into()));
        }
        self.inner.update_message_state(id, state)
    }

    fn set_remote_id(&self, id: &MessageId, remote_id: &str) -> StoreResult<()> {
        self.inner.set_remote_id(id, remote_id)
    }

    fn delete_message(&self, id: &MessageId) -> StoreResult<bool> {
        self.inner.delete_message(id)
    }

    fn list_messages(&self) -> StoreResult<Vec<OutboundMessage>> {
        self.inner.list_messages()
    }

    fn read_queued_messages(&self) -> StoreResult<Vec<OutboundMessage>> {
        self.inner.read_queued_messages()
    }

    fn reset_interrupted_sends(&self) -> StoreResult<usize> {
        self.inner.reset_interrupted_sends()
    }
}

pub struct TestHarness {
    pub executor: Arc<ScriptedExecutor>,
    pub store: Arc<FaultyStore>,
    pub provider: Arc<TestProvider>,
    pub coordinator: DeliveryCoordinator,
    events: Arc<Mutex<Vec<DeliveryEvent>>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_policy(DefaultRecoveryPolicy::default())
    }

    pub fn with_policy(policy: DefaultRecoveryPolicy) -> Self {
        Self::with_provider(TestProvider::two_trip(policy))
    }

    /// Every attempt is a single confirm request.
    pub fn one_trip() -> Self {
        Self::with_provider(TestProvider::one_trip(DefaultRecoveryPolicy::default()))
    }

    pub fn with_provider(provider: TestProvider) -> Self {
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = DispatchEngine::new(executor.clone(), EngineConfig::default());
        let client = DeliveryClient::new(engine);
        client.attach();

        let store = Arc::new(FaultyStore::default());
        let coordinator = DeliveryCoordinator::new(
            store.clone(),
            client,
            CoordinatorConfig {
                step_timeout: Duration::from_secs(2),
                ..CoordinatorConfig::default()
            },
        );
        let provider = Arc::new(provider);
        coordinator.register_provider(provider.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut rx = coordinator.subscribe();
        let sink = events.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => sink.lock().push(event),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            executor,
            store,
            provider,
            coordinator,
            events,
        }
    }

    /// Persist a queued message addressed to the test provider.
    pub fn queued_message(&self) -> OutboundMessage {
        let message = OutboundMessage::new(
            Target {
                provider: PROVIDER.into(),
                recipient: "alice".into(),
            },
            PayloadRef {
                path: PathBuf::from("/tmp/voice.ogg"),
                mime_type: "audio/ogg".into(),
                size_bytes: 10,
                duration_ms: None,
            },
        )
        .with_state(MessageState::queued());
        self.store.insert_message(&message).unwrap();
        message
    }

    pub fn state_of(&self, id: &MessageId) -> Option<MessageState> {
        self.store.get_message(id).unwrap().map(|m| m.state)
    }

    pub fn events_for(&self, id: &MessageId) -> Vec<DeliveryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.message_id() == id)
            .cloned()
            .collect()
    }

    pub fn names_for(&self, id: &MessageId) -> Vec<&'static str> {
        self.events_for(id).iter().map(|e| e.name()).collect()
    }

    /// Wait until a final event (finished, cancelled or queued) for `id`
    /// has been recorded.
    pub async fn settle(&self, id: &MessageId) -> bool {
        wait_until(WAIT, || {
            self.events_for(id).iter().any(|e| {
                matches!(
                    e,
                    DeliveryEvent::Finished { .. }
                        | DeliveryEvent::Cancelled { .. }
                        | DeliveryEvent::Queued { .. }
                )
            })
        })
        .await
    }

    pub fn confirm_calls(&self) -> Vec<RequestDescriptor> {
        self.executor
            .executed()
            .into_iter()
            .filter(|d| d.url().ends_with("/messages"))
            .collect()
    }
}

/// Poll `condition` every 5ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
