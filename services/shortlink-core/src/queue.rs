use tracing::warn;

use crate::models::ClickEvent;

/// C5: the bounded ingest queue between request handlers and the worker
/// pool. Backed by `async-channel`, whose receiver is MPMC — every worker
/// clones it directly rather than needing its own fan-out layer (§4.2).
#[derive(Clone)]
pub struct IngestQueue {
    tx: async_channel::Sender<ClickEvent>,
    rx: async_channel::Receiver<ClickEvent>,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity);
        Self { tx, rx }
    }

    pub fn receiver(&self) -> async_channel::Receiver<ClickEvent> {
        self.rx.clone()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.tx.capacity()
    }

    /// Offer an event to the queue without blocking the caller (§4.2,
    /// §5: "drop with a warning, never block the redirect path"). Returns
    /// `true` if the event was accepted.
    pub fn offer(&self, event: ClickEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(async_channel::TrySendError::Full(dropped)) => {
                warn!(
                    short_code = %dropped.short_code,
                    "ingest queue full, dropping click event"
                );
                false
            }
            Err(async_channel::TrySendError::Closed(_)) => {
                warn!("ingest queue closed, dropping click event");
                false
            }
        }
    }

    pub fn close(&self) {
        self.tx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_event(short_code: &str) -> ClickEvent {
        ClickEvent {
            short_code: short_code.to_string(),
            timestamp: Utc::now(),
            ip_address: "127.0.0.1".into(),
            user_agent: "test-agent".into(),
            referer: "direct".into(),
            visitor_hash: "deadbeef".into(),
        }
    }

    #[test]
    fn offer_accepts_until_capacity_then_drops() {
        let queue = IngestQueue::new(2);
        assert!(queue.offer(sample_event("abc123")));
        assert!(queue.offer(sample_event("abc123")));
        assert!(!queue.offer(sample_event("abc123")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn offer_after_close_is_dropped() {
        let queue = IngestQueue::new(4);
        queue.close();
        assert!(!queue.offer(sample_event("abc123")));
    }
}
