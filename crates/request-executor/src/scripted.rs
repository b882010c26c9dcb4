//! Canned-response executor for offline runs and tests.

use crate::RequestExecutor;
use async_trait::async_trait;
use parking_lot::Mutex;
use request_protocol_types::{
    RequestDescriptor, ResponseDescriptor, TransportError, TransportErrorKind,
};
use std::collections::VecDeque;
use std::time::Duration;

/// Replays queued responses in order, falling back to a default.
///
/// Responses queued with [`ScriptedExecutor::queue_for`] only answer
/// requests whose URL contains the given fragment and take precedence over
/// the global queue. Every executed descriptor is recorded.
pub struct ScriptedExecutor {
    queue: Mutex<VecDeque<ResponseDescriptor>>,
    routes: Mutex<Vec<(String, VecDeque<ResponseDescriptor>)>>,
    default_response: Mutex<ResponseDescriptor>,
    executed: Mutex<Vec<RequestDescriptor>>,
    latency: Mutex<Duration>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExecutor {
    /// Executor answering every request with `200 OK` and an empty body.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            routes: Mutex::new(Vec::new()),
            default_response: Mutex::new(ResponseDescriptor::with_status(200, Vec::new())),
            executed: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_default_response(&self, response: ResponseDescriptor) {
        *self.default_response.lock() = response;
    }

    pub fn queue_response(&self, response: ResponseDescriptor) {
        self.queue.lock().push_back(response);
    }

    pub fn queue_status(&self, status: u16, body: impl Into<Vec<u8>>) {
        self.queue_response(ResponseDescriptor::with_status(status, body));
    }

    pub fn queue_transport_failure(&self, kind: TransportErrorKind, message: &str) {
        self.queue_response(ResponseDescriptor::from_transport_error(TransportError::new(
            kind, message,
        )));
    }

    /// Queue a response for the next request whose URL contains `fragment`.
    pub fn queue_for(&self, fragment: impl Into<String>, response: ResponseDescriptor) {
        let fragment = fragment.into();
        let mut routes = self.routes.lock();
        match routes.iter_mut().find(|(f, _)| *f == fragment) {
            Some((_, queue)) => queue.push_back(response),
            None => routes.push((fragment, VecDeque::from([response]))),
        }
    }

    /// Delay applied to every execution before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn executed(&self) -> Vec<RequestDescriptor> {
        self.executed.lock().clone()
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().len()
    }

    pub fn executed_urls(&self) -> Vec<String> {
        self.executed
            .lock()
            .iter()
            .map(|d| d.url().to_string())
            .collect()
    }

    fn next_response(&self, url: &str) -> ResponseDescriptor {
        {
            let mut routes = self.routes.lock();
            for (fragment, queue) in routes.iter_mut() {
                if url.contains(fragment.as_str()) {
                    if let Some(response) = queue.pop_front() {
                        return response;
                    }
                }
            }
        }

        if let Some(response) = self.queue.lock().pop_front() {
            return response;
        }
        self.default_response.lock().clone()
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn execute(&self, descriptor: &RequestDescriptor) -> ResponseDescriptor {
        self.executed.lock().push(descriptor.clone());

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.next_response(descriptor.url())
    }
}
