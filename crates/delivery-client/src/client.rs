//! Delivery client.

use crate::{ClientError, ClientEvent, ClientListener, ClientResult, ClientState};
use dispatch_engine::{DispatchEngine, EngineEvent, ObserverId};
use parking_lot::Mutex;
use request_protocol_types::{RequestDescriptor, RequestId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Caller-side handle onto the [`DispatchEngine`].
///
/// An identity leaves the outstanding set exactly once, on its first
/// resolution (live event, replayed buffer entry or local cancel). Later
/// resolutions for the same identity are dropped.
#[derive(Clone)]
pub struct DeliveryClient {
    inner: Arc<Inner>,
}

struct Inner {
    engine: DispatchEngine,
    /// Descriptor is `None` for identities restored from a saved state.
    outstanding: Mutex<HashMap<RequestId, Option<RequestDescriptor>>>,
    waiters: Mutex<HashMap<RequestId, oneshot::Sender<ClientEvent>>>,
    listener: Mutex<Option<ClientListener>>,
    attachment: Mutex<Option<(ObserverId, JoinHandle<()>)>>,
}

impl DeliveryClient {
    pub fn new(engine: DispatchEngine) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                outstanding: Mutex::new(HashMap::new()),
                waiters: Mutex::new(HashMap::new()),
                listener: Mutex::new(None),
                attachment: Mutex::new(None),
            }),
        }
    }

    pub fn set_listener(&self, listener: ClientListener) {
        *self.inner.listener.lock() = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.inner.listener.lock() = None;
    }

    /// Start receiving engine events and replay anything buffered for the
    /// identities still outstanding. Idempotent.
    pub fn attach(&self) {
        {
            let mut attachment = self.inner.attachment.lock();
            if attachment.is_some() {
                return;
            }

            let (observer, mut rx) = self.inner.engine.observe();
            let inner = Arc::downgrade(&self.inner);
            let pump = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match inner.upgrade() {
                        Some(inner) => inner.on_engine_event(event),
                        None => break,
                    }
                }
            });
            *attachment = Some((observer, pump));
        }

        let replayed = self.inner.replay_buffered();
        info!(
            replayed,
            outstanding = self.outstanding_count(),
            "Delivery client attached"
        );
    }

    /// Stop receiving engine events. Outstanding identities are kept.
    pub fn detach(&self) {
        if let Some((observer, pump)) = self.inner.attachment.lock().take() {
            self.inner.engine.unobserve(observer);
            pump.abort();
            info!(outstanding = self.outstanding_count(), "Delivery client detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attachment.lock().is_some()
    }

    /// Submit `descriptor` and track its identity as outstanding.
    pub fn perform_request(&self, descriptor: RequestDescriptor) -> ClientResult<RequestId> {
        let id = descriptor.id();
        self.inner
            .outstanding
            .lock()
            .insert(id, Some(descriptor.clone()));

        if let Err(e) = self.inner.engine.submit(descriptor) {
            self.inner.outstanding.lock().remove(&id);
            return Err(e.into());
        }

        debug!(request_id = %id, "Request outstanding");
        Ok(id)
    }

    /// Submit `descriptor` and wait for its resolution.
    ///
    /// On timeout the request stays outstanding and keeps running; callers
    /// decide whether to [`DeliveryClient::cancel`] it.
    pub async fn perform_and_wait(
        &self,
        descriptor: RequestDescriptor,
        timeout: Duration,
    ) -> ClientResult<ClientEvent> {
        if !self.is_attached() {
            return Err(ClientError::Detached);
        }

        let id = descriptor.id();
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().insert(id, tx);

        if let Err(e) = self.perform_request(descriptor) {
            self.inner.waiters.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            // Sender dropped without a value: the client was torn down.
            Ok(Err(_)) => Err(ClientError::Detached),
            Err(_) => {
                self.inner.waiters.lock().remove(&id);
                warn!(request_id = %id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Err(ClientError::Timeout(id))
            }
        }
    }

    /// Cancel an outstanding request. It resolves as `Cancelled` right away;
    /// a late engine event for it is ignored.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let was_outstanding = self.inner.outstanding.lock().contains_key(id);
        if was_outstanding {
            self.inner.engine.cancel(id);
            self.inner.resolve(ClientEvent::Cancelled(*id));
        }
        was_outstanding
    }

    pub fn is_outstanding(&self, id: &RequestId) -> bool {
        self.inner.outstanding.lock().contains_key(id)
    }

    pub fn outstanding_count(&self) -> usize {
        self.inner.outstanding.lock().len()
    }

    pub fn outstanding_ids(&self) -> Vec<RequestId> {
        self.inner.outstanding.lock().keys().copied().collect()
    }

    /// Descriptor for an outstanding identity, if this process submitted it.
    pub fn outstanding_descriptor(&self, id: &RequestId) -> Option<RequestDescriptor> {
        self.inner.outstanding.lock().get(id).cloned().flatten()
    }

    pub fn save(&self) -> ClientState {
        let mut outstanding = self.outstanding_ids();
        outstanding.sort();
        ClientState { outstanding }
    }

    /// Merge saved identities into the outstanding set. When attached,
    /// anything already buffered for them is replayed immediately.
    pub fn load(&self, state: ClientState) {
        {
            let mut outstanding = self.inner.outstanding.lock();
            for id in state.outstanding {
                outstanding.entry(id).or_insert(None);
            }
        }

        if self.is_attached() {
            self.inner.replay_buffered();
        }
    }

    pub fn save_to_file(&self, path: &Path) -> ClientResult<()> {
        self.save().write(path)
    }

    pub fn load_from_file(&self, path: &Path) -> ClientResult<()> {
        let state = ClientState::read(path)?;
        debug!(path = %path.display(), outstanding = state.outstanding.len(), "Loaded client state");
        self.load(state);
        Ok(())
    }
}

impl Inner {
    fn on_engine_event(&self, event: EngineEvent) {
        let id = event.request_id();
        if !self.outstanding.lock().contains_key(&id) {
            return;
        }

        match event {
            EngineEvent::Terminal(terminal) => {
                // Delivered live, so the buffered copy must not replay later.
                self.engine.pop_buffered_terminal_event(&id);
                self.resolve(terminal.into());
            }
            EngineEvent::Cancelled(id) => {
                self.resolve(ClientEvent::Cancelled(id));
            }
        }
    }

    fn replay_buffered(&self) -> usize {
        let ids: Vec<RequestId> = self.outstanding.lock().keys().copied().collect();
        let mut replayed = 0;
        for id in ids {
            if let Some(event) = self.engine.pop_buffered_terminal_event(&id) {
                debug!(request_id = %id, "Replaying buffered terminal event");
                if self.resolve(event.into()) {
                    replayed += 1;
                }
            }
        }
        replayed
    }

    /// Returns false if the identity was already resolved.
    fn resolve(&self, event: ClientEvent) -> bool {
        let id = event.request_id();
        if self.outstanding.lock().remove(&id).is_none() {
            debug!(request_id = %id, "Duplicate resolution ignored");
            return false;
        }

        if let Some(waiter) = self.waiters.lock().remove(&id) {
            let _ = waiter.send(event.clone());
        }

        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(event);
        }
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some((observer, pump)) = self.attachment.get_mut().take() {
            self.engine.unobserve(observer);
            pump.abort();
        }
    }
}
