use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;
use uuid::Uuid;

use crate::models::StreamFrame;

struct Mailbox {
    id: Uuid,
    tx: tokio::sync::mpsc::Sender<StreamFrame>,
}

/// C8: fans stats updates out to live SSE subscribers. One bounded mailbox
/// per subscription; a full mailbox is simply skipped (§4.6: "subscribers
/// that fall behind lose intermediate updates, never the connection").
#[derive(Default)]
pub struct Broker {
    subscribers: Mutex<HashMap<String, Vec<Mailbox>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new subscriber for `short_code` and return the receiving
    /// end of its mailbox.
    pub fn subscribe(
        &self,
        short_code: &str,
        mailbox_capacity: usize,
    ) -> (Uuid, tokio::sync::mpsc::Receiver<StreamFrame>) {
        let id = Uuid::new_v4();
        let (tx, rx) = tokio::sync::mpsc::channel(mailbox_capacity);
        let mut subscribers = self.subscribers.lock().expect("broker mutex poisoned");
        subscribers
            .entry(short_code.to_string())
            .or_default()
            .push(Mailbox { id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, short_code: &str, id: Uuid) {
        let mut subscribers = self.subscribers.lock().expect("broker mutex poisoned");
        if let Some(mailboxes) = subscribers.get_mut(short_code) {
            mailboxes.retain(|m| m.id != id);
            if mailboxes.is_empty() {
                subscribers.remove(short_code);
            }
        }
    }

    /// Broadcast the latest frame to every subscriber of `frame.short_code`.
    /// Returns the number of mailboxes that accepted the frame.
    pub fn broadcast(&self, frame: StreamFrame) -> usize {
        let subscribers = self.subscribers.lock().expect("broker mutex poisoned");
        let Some(mailboxes) = subscribers.get(&frame.short_code) else {
            return 0;
        };
        let mut delivered = 0;
        for mailbox in mailboxes {
            match mailbox.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                    debug!(short_code = %frame.short_code, subscriber = %mailbox.id, "mailbox full, dropping frame");
                }
                Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                    debug!(short_code = %frame.short_code, subscriber = %mailbox.id, "mailbox closed");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, short_code: &str) -> usize {
        let subscribers = self.subscribers.lock().expect("broker mutex poisoned");
        subscribers.get(short_code).map(|m| m.len()).unwrap_or(0)
    }

    /// Drop every mailbox sender so every live subscriber's `recv()` resolves
    /// to `None` and its SSE stream ends (§5: "close subscribers' streams" is
    /// a required shutdown step). Called once, after the shutdown signal
    /// fires, so in-flight streams release before the server future is
    /// awaited to completion.
    pub fn close_all(&self) {
        let mut subscribers = self.subscribers.lock().expect("broker mutex poisoned");
        subscribers.clear();
    }
}

/// RAII handle returned by [`Broker::subscribe_guarded`]. Deregisters the
/// mailbox when dropped, which covers client disconnect: axum drops the SSE
/// stream's future without resuming it past its last await point, so any
/// cleanup that ran as ordinary code after the receive loop would never
/// execute — only `Drop` is guaranteed to run.
pub struct Subscription {
    broker: std::sync::Arc<Broker>,
    short_code: String,
    id: Uuid,
    rx: tokio::sync::mpsc::Receiver<StreamFrame>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<StreamFrame> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(&self.short_code, self.id);
    }
}

impl Broker {
    pub fn subscribe_guarded(
        self: &std::sync::Arc<Self>,
        short_code: &str,
        mailbox_capacity: usize,
    ) -> Subscription {
        let (id, rx) = self.subscribe(short_code, mailbox_capacity);
        Subscription {
            broker: self.clone(),
            short_code: short_code.to_string(),
            id,
            rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(short_code: &str) -> StreamFrame {
        StreamFrame {
            short_code: short_code.to_string(),
            timestamp: Utc::now(),
            total_clicks: 1,
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_to_matching_subscriber_only() {
        let broker = Broker::new();
        let (_id, mut rx) = broker.subscribe("abc123", 4);
        let (_id2, mut other_rx) = broker.subscribe("zzz999", 4);

        let delivered = broker.broadcast(frame("abc123"));
        assert_eq!(delivered, 1);
        assert!(rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_mailbox_is_skipped_without_error() {
        let broker = Broker::new();
        let (_id, _rx) = broker.subscribe("abc123", 1);
        assert_eq!(broker.broadcast(frame("abc123")), 1);
        // Second frame: mailbox still holds the first, unread.
        assert_eq!(broker.broadcast(frame("abc123")), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_mailbox() {
        let broker = Broker::new();
        let (id, _rx) = broker.subscribe("abc123", 4);
        assert_eq!(broker.subscriber_count("abc123"), 1);
        broker.unsubscribe("abc123", id);
        assert_eq!(broker.subscriber_count("abc123"), 0);
    }

    #[tokio::test]
    async fn dropping_a_guarded_subscription_deregisters_it() {
        let broker = std::sync::Arc::new(Broker::new());
        let subscription = broker.subscribe_guarded("abc123", 4);
        assert_eq!(broker.subscriber_count("abc123"), 1);
        drop(subscription);
        assert_eq!(broker.subscriber_count("abc123"), 0);
    }

    #[tokio::test]
    async fn close_all_ends_every_live_subscriber_stream() {
        let broker = Broker::new();
        let (_id, mut rx) = broker.subscribe("abc123", 4);
        let (_id2, mut other_rx) = broker.subscribe("zzz999", 4);

        broker.close_all();

        assert_eq!(rx.recv().await, None);
        assert_eq!(other_rx.recv().await, None);
        assert_eq!(broker.subscriber_count("abc123"), 0);
    }
}
