//! Per-identity buffer of terminal events.

use request_protocol_types::{RequestId, TerminalEvent};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Holds the latest terminal event per request until it is popped or expires.
#[derive(Debug)]
pub struct TerminalBuffer {
    entries: HashMap<RequestId, (TerminalEvent, Instant)>,
    ttl: Duration,
}

impl TerminalBuffer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Store `event`, pruning anything older than the TTL first.
    pub fn insert(&mut self, event: TerminalEvent) {
        self.prune(Instant::now());
        self.entries
            .insert(event.request_id, (event, Instant::now()));
    }

    /// Remove and return the event for `id`. Second pop returns `None`.
    pub fn pop(&mut self, id: &RequestId) -> Option<TerminalEvent> {
        self.entries.remove(id).map(|(event, _)| event)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, (_, stored_at)| now.duration_since(*stored_at) < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use request_protocol_types::ResponseDescriptor;

    fn event() -> TerminalEvent {
        TerminalEvent::from_response(RequestId::new(), ResponseDescriptor::with_status(200, ""))
    }

    #[test]
    fn pop_is_one_shot() {
        let mut buffer = TerminalBuffer::new(Duration::from_secs(60));
        let e = event();
        let id = e.request_id;
        buffer.insert(e);

        assert!(buffer.pop(&id).is_some());
        assert!(buffer.pop(&id).is_none());
        assert!(buffer.pop(&RequestId::new()).is_none());
    }

    #[test]
    fn insert_prunes_expired_entries() {
        let mut buffer = TerminalBuffer::new(Duration::from_millis(10));
        let old = event();
        let old_id = old.request_id;
        buffer.insert(old);

        std::thread::sleep(Duration::from_millis(30));
        buffer.insert(event());

        assert_eq!(buffer.len(), 1);
        assert!(buffer.pop(&old_id).is_none());
    }
}
