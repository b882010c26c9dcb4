//! Dispatch engine.

use crate::{EngineError, EngineEvent, EngineResult, ObserverId, TerminalBuffer};
use parking_lot::Mutex;
use request_executor::RequestExecutor;
use request_protocol_types::{CancelToken, RequestDescriptor, RequestId, TerminalEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Smallest worker pool the engine runs with.
pub const MIN_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of requests executing at once.
    pub worker_pool_size: usize,
    /// How long an unclaimed terminal event stays poppable.
    pub buffer_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            worker_pool_size: cores.max(MIN_WORKERS),
            buffer_ttl: Duration::from_secs(300),
        }
    }
}

/// Executes descriptors on a bounded pool and fans out their outcomes.
///
/// Cloning is cheap; clones share the same pool, observers and buffer.
#[derive(Clone)]
pub struct DispatchEngine {
    inner: Arc<Inner>,
}

struct Inner {
    executor: Arc<dyn RequestExecutor>,
    permits: Arc<Semaphore>,
    running: Mutex<HashMap<RequestId, CancelToken>>,
    buffer: Mutex<TerminalBuffer>,
    observers: Mutex<Vec<(ObserverId, mpsc::UnboundedSender<EngineEvent>)>>,
    next_observer: AtomicU64,
    shut_down: AtomicBool,
}

impl DispatchEngine {
    pub fn new(executor: Arc<dyn RequestExecutor>, config: EngineConfig) -> Self {
        let workers = config.worker_pool_size.max(1);
        info!(workers, buffer_ttl_secs = config.buffer_ttl.as_secs(), "Dispatch engine started");

        Self {
            inner: Arc::new(Inner {
                executor,
                permits: Arc::new(Semaphore::new(workers)),
                running: Mutex::new(HashMap::new()),
                buffer: Mutex::new(TerminalBuffer::new(config.buffer_ttl)),
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Queue `descriptor` for execution and return its identity.
    ///
    /// Submitting an identity that is already running is a no-op.
    pub fn submit(&self, descriptor: RequestDescriptor) -> EngineResult<RequestId> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }

        let id = descriptor.id();
        {
            let mut running = self.inner.running.lock();
            if running.contains_key(&id) {
                warn!(request_id = %id, "Request already running, ignoring submit");
                return Ok(id);
            }
            running.insert(id, descriptor.cancel_token().clone());
        }

        debug!(request_id = %id, url = %descriptor.url(), "Request submitted");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run(descriptor).await;
        });

        Ok(id)
    }

    /// Cancel a running request. Returns false if the identity is not running.
    pub fn cancel(&self, id: &RequestId) -> bool {
        match self.inner.running.lock().get(id) {
            Some(token) => {
                debug!(request_id = %id, "Cancelling request");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Register an observer. Every event published afterwards is delivered
    /// to it once, until [`DispatchEngine::unobserve`] or the receiver is dropped.
    pub fn observe(&self) -> (ObserverId, mpsc::UnboundedReceiver<EngineEvent>) {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.observers.lock().push((id, tx));
        debug!(observer = %id, "Observer registered");
        (id, rx)
    }

    pub fn unobserve(&self, id: ObserverId) {
        self.inner.observers.lock().retain(|(observer, _)| *observer != id);
        debug!(observer = %id, "Observer removed");
    }

    /// Take the buffered terminal event for `id`, if still held.
    pub fn pop_buffered_terminal_event(&self, id: &RequestId) -> Option<TerminalEvent> {
        self.inner.buffer.lock().pop(id)
    }

    pub fn is_running(&self, id: &RequestId) -> bool {
        self.inner.running.lock().contains_key(id)
    }

    pub fn running_count(&self) -> usize {
        self.inner.running.lock().len()
    }

    pub fn buffered_count(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    /// Cancel everything running, drop buffered events and observers, and
    /// refuse further submissions.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let cancelled = {
            let running = self.inner.running.lock();
            for token in running.values() {
                token.cancel();
            }
            running.len()
        };
        self.inner.permits.close();
        self.inner.buffer.lock().clear();
        self.inner.observers.lock().clear();

        info!(cancelled, "Dispatch engine shut down");
    }
}

impl Inner {
    async fn run(&self, descriptor: RequestDescriptor) {
        let id = descriptor.id();
        let token = descriptor.cancel_token().clone();

        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => permit.ok(),
            _ = token.cancelled() => None,
        };

        let response = match permit {
            Some(_permit) if !token.is_cancelled() => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    response = self.executor.execute(&descriptor) => Some(response),
                }
            }
            _ => None,
        };

        self.running.lock().remove(&id);

        match response {
            Some(response) => {
                let event = TerminalEvent::from_response(id, response);
                debug!(
                    request_id = %id,
                    kind = ?event.kind,
                    status = event.response.status_code,
                    "Request finished"
                );
                // Buffer before publishing so a live observer can discard it.
                self.buffer.lock().insert(event.clone());
                self.publish(EngineEvent::Terminal(event));
            }
            None => {
                debug!(request_id = %id, "Request cancelled");
                self.publish(EngineEvent::Cancelled(id));
            }
        }
    }

    fn publish(&self, event: EngineEvent) {
        let mut observers = self.observers.lock();
        observers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}
