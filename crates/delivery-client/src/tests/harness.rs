//! Test harness for delivery client scenarios.

use crate::{ClientEvent, ClientListener, DeliveryClient};
use dispatch_engine::{DispatchEngine, EngineConfig};
use parking_lot::Mutex;
use request_executor::ScriptedExecutor;
use request_protocol_types::RequestId;
use std::sync::Arc;
use std::time::Duration;

/// Collects every client callback.
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<ClientEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> ClientListener {
        let events = self.events.clone();
        Arc::new(move |event| events.lock().push(event))
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().clone()
    }

    pub fn count_for(&self, id: &RequestId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.request_id() == *id)
            .count()
    }
}

pub struct TestHarness {
    pub executor: Arc<ScriptedExecutor>,
    pub engine: DispatchEngine,
    pub client: DeliveryClient,
    pub recorder: RecordingListener,
}

impl TestHarness {
    pub fn new() -> Self {
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = DispatchEngine::new(
            executor.clone(),
            EngineConfig {
                worker_pool_size: 4,
                buffer_ttl: Duration::from_secs(60),
            },
        );
        let client = DeliveryClient::new(engine.clone());
        let recorder = RecordingListener::new();
        client.set_listener(recorder.listener());

        Self {
            executor,
            engine,
            client,
            recorder,
        }
    }

    /// A second client sharing this harness's engine.
    pub fn sibling_client(&self) -> (DeliveryClient, RecordingListener) {
        let client = DeliveryClient::new(self.engine.clone());
        let recorder = RecordingListener::new();
        client.set_listener(recorder.listener());
        (client, recorder)
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
