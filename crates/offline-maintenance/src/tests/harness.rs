//! Test harness for maintenance scenarios.

use crate::{
    MaintenanceConfig, MaintenanceError, MaintenanceLoop, MaintenanceResult, ManualConnectivity,
    PushRegistrar,
};
use async_trait::async_trait;
use delivery_client::DeliveryClient;
use delivery_coordinator::{CoordinatorConfig, DeliveryCoordinator};
use dispatch_engine::{DispatchEngine, EngineConfig};
use message_store::{
    DeliveryError, FailureKind, InMemoryMessageStore, MessageId, MessageState, MessageStore,
    OutboundMessage, PayloadRef, Target,
};
use request_executor::ScriptedExecutor;
use request_protocol_types::RequestDescriptor;
use send_unit::{DeliveryProvider, DeliveryReceipt, StepContext, StepError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(3);

/// Delivers with a single `POST /messages`.
pub struct OneTripProvider;

#[async_trait]
impl DeliveryProvider for OneTripProvider {
    fn name(&self) -> &str {
        "test"
    }

    async fn refresh_token(&self, _ctx: &StepContext, _force: bool) -> Result<(), StepError> {
        Ok(())
    }

    async fn upload_payload(
        &self,
        _ctx: &StepContext,
        _message: &OutboundMessage,
    ) -> Result<(), StepError> {
        Ok(())
    }

    async fn confirm_delivery(
        &self,
        ctx: &StepContext,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, StepError> {
        ctx.round_trip(
            RequestDescriptor::post("https://provider.test/messages")
                .with_header("Idempotency-Key", message.delivery_key.clone()),
        )
        .await?;
        Ok(DeliveryReceipt::default())
    }

    async fn mark_read(&self, _ctx: &StepContext, _remote_id: &str) -> Result<(), StepError> {
        Ok(())
    }
}

/// Counts refreshes; optionally fails them.
#[derive(Default)]
pub struct CountingRegistrar {
    refreshes: AtomicUsize,
    failing: AtomicBool,
}

impl CountingRegistrar {
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PushRegistrar for CountingRegistrar {
    async fn refresh_registration(&self) -> MaintenanceResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MaintenanceError::Registration("push service unavailable".into()));
        }
        Ok(())
    }
}

pub struct TestHarness {
    pub executor: Arc<ScriptedExecutor>,
    pub store: Arc<InMemoryMessageStore>,
    pub coordinator: DeliveryCoordinator,
    pub connectivity: Arc<ManualConnectivity>,
    pub registrar: Arc<CountingRegistrar>,
    pub maintenance: MaintenanceLoop,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(MaintenanceConfig {
            initial_delay: Duration::from_secs(60),
            interval: Duration::from_secs(3600),
        })
    }

    pub fn with_config(config: MaintenanceConfig) -> Self {
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = DispatchEngine::new(executor.clone(), EngineConfig::default());
        let client = DeliveryClient::new(engine);
        client.attach();

        let store = Arc::new(InMemoryMessageStore::new());
        let coordinator = DeliveryCoordinator::new(
            store.clone(),
            client,
            CoordinatorConfig {
                step_timeout: Duration::from_secs(2),
                ..CoordinatorConfig::default()
            },
        );
        coordinator.register_provider(Arc::new(OneTripProvider));

        let connectivity = Arc::new(ManualConnectivity::new(true));
        let registrar = Arc::new(CountingRegistrar::default());
        let maintenance = MaintenanceLoop::new(coordinator.clone(), connectivity.clone(), config)
            .with_registrar(registrar.clone());

        Self {
            executor,
            store,
            coordinator,
            connectivity,
            registrar,
            maintenance,
        }
    }

    pub fn insert(&self, state: MessageState) -> OutboundMessage {
        let message = OutboundMessage::new(
            Target {
                provider: "test".into(),
                recipient: "alice".into(),
            },
            PayloadRef {
                path: PathBuf::from("/tmp/voice.ogg"),
                mime_type: "audio/ogg".into(),
                size_bytes: 10,
                duration_ms: None,
            },
        )
        .with_state(state);
        self.store.insert_message(&message).unwrap();
        message
    }

    pub fn queued(&self) -> OutboundMessage {
        self.insert(MessageState::queued())
    }

    /// Queued after a give-up with a transient failure.
    pub fn given_up(&self) -> OutboundMessage {
        self.insert(MessageState::Queued {
            last_error: Some(DeliveryError::new(FailureKind::NoConnectivity, "offline")),
        })
    }

    pub fn paused(&self) -> OutboundMessage {
        self.insert(MessageState::Queued {
            last_error: Some(
                DeliveryError::new(FailureKind::ProviderAuthorizationRequired, "reauthorize")
                    .awaiting_user_action(),
            ),
        })
    }

    pub fn state_of(&self, id: &MessageId) -> Option<MessageState> {
        self.store.get_message(id).unwrap().map(|m| m.state)
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
