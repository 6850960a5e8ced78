use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::metrics::AppMetrics;
use crate::models::{ClickEvent, StreamFrame};
use crate::store::PrimaryStore;

/// C6/C7: one worker batches clicks off the ingest queue by size or
/// timeout, flushes them transactionally, aggregates stats and referrers,
/// and tells the broker what changed (§4.3). The realtime counter on the
/// remote KV is bumped by the redirect handler itself (§4.5 step 4d), not
/// here — it exists to be readable before the first flush, not after it.
pub struct Worker {
    id: usize,
    receiver: async_channel::Receiver<ClickEvent>,
    store: Arc<dyn PrimaryStore>,
    broker: Arc<Broker>,
    metrics: Arc<AppMetrics>,
    batch_size: usize,
    batch_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        receiver: async_channel::Receiver<ClickEvent>,
        store: Arc<dyn PrimaryStore>,
        broker: Arc<Broker>,
        metrics: Arc<AppMetrics>,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        Self {
            id,
            receiver,
            store,
            broker,
            metrics,
            batch_size,
            batch_timeout,
        }
    }

    pub async fn run(self) {
        info!(worker_id = self.id, "worker started");
        let mut batch: Vec<ClickEvent> = Vec::with_capacity(self.batch_size);
        // Deadline is relative to the *first* event in the current batch
        // (§4.3 step 2), not re-armed on every receive — otherwise a
        // steady trickle of events would never trip the timeout.
        let mut deadline = tokio::time::Instant::now() + self.batch_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, self.receiver.recv()).await {
                Ok(Ok(event)) => {
                    if batch.is_empty() {
                        deadline = tokio::time::Instant::now() + self.batch_timeout;
                    }
                    batch.push(event);
                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch).await;
                        deadline = tokio::time::Instant::now() + self.batch_timeout;
                    }
                }
                Ok(Err(_)) => {
                    // Queue closed: drain whatever is left, then exit.
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                    info!(worker_id = self.id, "ingest queue closed, worker exiting");
                    return;
                }
                Err(_) => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                    deadline = tokio::time::Instant::now() + self.batch_timeout;
                }
            }
        }
    }

    async fn flush(&self, batch: &mut Vec<ClickEvent>) {
        let start = std::time::Instant::now();
        let events = std::mem::take(batch);
        let batch_len = events.len();

        if let Err(err) = self.store.batch_insert_clicks(&events).await {
            error!(worker_id = self.id, %err, "failed to insert click batch, events lost");
            self.metrics.flush_failures.inc();
            return;
        }

        let per_code = group_by_short_code(&events);

        for (short_code, code_events) in per_code {
            let delta_total = code_events.len() as i64;

            if let Err(err) = self.store.add_clicks(&short_code, delta_total).await {
                error!(%short_code, %err, "failed to add click total");
                continue;
            }

            // Authoritative recount; on failure leave unique_visitors
            // unchanged rather than guess (§9 Open Question decision).
            match self.store.recount_uniques(&short_code).await {
                Ok(count) => {
                    if let Err(err) = self.store.set_unique_visitors(&short_code, count).await {
                        warn!(%short_code, %err, "failed to persist recounted unique visitors");
                    }
                }
                Err(err) => {
                    warn!(%short_code, %err, "unique visitor recount failed, leaving value unchanged");
                }
            }

            for (referer, delta) in referer_deltas(&code_events) {
                if let Err(err) = self.store.upsert_referrer(&short_code, &referer, delta).await {
                    warn!(%short_code, %referer, %err, "failed to upsert referrer count");
                }
            }

            let total_clicks = match self.store.get_stats(&short_code).await {
                Ok(Some(stats)) => stats.total_clicks,
                Ok(None) => delta_total,
                Err(err) => {
                    warn!(%short_code, %err, "failed to read back stats for broadcast");
                    delta_total
                }
            };

            let frame = StreamFrame {
                short_code: short_code.clone(),
                timestamp: Utc::now(),
                total_clicks,
            };
            let subscriber_count = self.broker.subscriber_count(&short_code);
            let delivered = self.broker.broadcast(frame);
            self.metrics.broker_broadcast_total.inc_by(delivered as u64);
            self.metrics
                .broker_mailbox_full_total
                .inc_by((subscriber_count.saturating_sub(delivered)) as u64);
        }

        self.metrics.flush_total.inc();
        self.metrics
            .flush_batch_size
            .observe(batch_len as f64);
        self.metrics
            .flush_duration_seconds
            .observe(start.elapsed().as_secs_f64());
    }
}

/// Group a flushed batch by `short_code`, preserving arrival order within
/// each group (§4.3 step 2).
fn group_by_short_code(events: &[ClickEvent]) -> HashMap<String, Vec<&ClickEvent>> {
    let mut per_code: HashMap<String, Vec<&ClickEvent>> = HashMap::new();
    for event in events {
        per_code.entry(event.short_code.clone()).or_default().push(event);
    }
    per_code
}

/// Per-referer increment counts for one short code's slice of a batch. An
/// empty referer is not counted as a referrer (§4.3 edge case).
fn referer_deltas(events: &[&ClickEvent]) -> HashMap<String, i64> {
    let mut deltas: HashMap<String, i64> = HashMap::new();
    for event in events {
        if event.referer.is_empty() {
            continue;
        }
        *deltas.entry(event.referer.clone()).or_insert(0) += 1;
    }
    deltas
}

/// Spawn `worker_count` workers sharing one MPMC receiver clone each.
pub fn spawn_workers(
    worker_count: usize,
    receiver: async_channel::Receiver<ClickEvent>,
    store: Arc<dyn PrimaryStore>,
    broker: Arc<Broker>,
    metrics: Arc<AppMetrics>,
    batch_size: usize,
    batch_timeout: Duration,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..worker_count)
        .map(|id| {
            let worker = Worker::new(
                id,
                receiver.clone(),
                store.clone(),
                broker.clone(),
                metrics.clone(),
                batch_size,
                batch_timeout,
            );
            tokio::spawn(worker.run())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(short_code: &str, referer: &str) -> ClickEvent {
        ClickEvent {
            short_code: short_code.to_string(),
            timestamp: Utc::now(),
            ip_address: "127.0.0.1".into(),
            user_agent: "test-agent".into(),
            referer: referer.to_string(),
            visitor_hash: "deadbeef".into(),
        }
    }

    #[test]
    fn group_by_short_code_splits_a_mixed_batch() {
        let events = vec![event("abc123", ""), event("zzz999", ""), event("abc123", "")];
        let grouped = group_by_short_code(&events);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["abc123"].len(), 2);
        assert_eq!(grouped["zzz999"].len(), 1);
    }

    #[test]
    fn referer_deltas_excludes_empty_referer() {
        let events = vec![
            event("abc123", "https://t.co"),
            event("abc123", ""),
            event("abc123", "https://t.co"),
        ];
        let refs: Vec<&ClickEvent> = events.iter().collect();
        let deltas = referer_deltas(&refs);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas["https://t.co"], 2);
        assert!(!deltas.contains_key(""));
    }

    #[test]
    fn referer_deltas_counts_each_distinct_referer() {
        let events = vec![
            event("abc123", "https://a.com"),
            event("abc123", "https://b.com"),
            event("abc123", "https://a.com"),
        ];
        let refs: Vec<&ClickEvent> = events.iter().collect();
        let deltas = referer_deltas(&refs);
        assert_eq!(deltas["https://a.com"], 2);
        assert_eq!(deltas["https://b.com"], 1);
    }

    // ── Worker::flush ───────────────────────────────────────────────────────

    use crate::models::{Link, LinkStats, ReferrerCount, TimePoint};
    use crate::store::{Bucket, StoreError};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct FakeStore {
        fail_batch_insert: bool,
        fail_add_clicks_for: HashSet<String>,
        fail_recount_for: HashSet<String>,
        batch_insert_calls: AtomicUsize,
        recount_calls: AtomicUsize,
        set_unique_calls: AtomicUsize,
        stats: TokioMutex<HashMap<String, LinkStats>>,
        clicks: TokioMutex<Vec<ClickEvent>>,
        referrers: TokioMutex<HashMap<(String, String), i64>>,
    }

    impl FakeStore {
        fn seed_stats(&mut self, short_code: &str, total_clicks: i64, unique_visitors: i64) {
            self.stats.get_mut().insert(
                short_code.to_string(),
                LinkStats {
                    short_code: short_code.to_string(),
                    total_clicks,
                    unique_visitors,
                    last_updated: Utc::now(),
                },
            );
        }
    }

    #[async_trait]
    impl PrimaryStore for FakeStore {
        async fn insert_link(&self, _: &str, _: &str, _: &str) -> Result<Link, StoreError> {
            unimplemented!("not exercised by flush tests")
        }
        async fn get_by_code(&self, _: &str) -> Result<Option<Link>, StoreError> {
            Ok(None)
        }
        async fn list_by_user(&self, _: &str) -> Result<Vec<Link>, StoreError> {
            Ok(vec![])
        }
        async fn get_all_links(&self) -> Result<Vec<Link>, StoreError> {
            Ok(vec![])
        }

        async fn batch_insert_clicks(&self, events: &[ClickEvent]) -> Result<(), StoreError> {
            self.batch_insert_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_batch_insert {
                return Err(StoreError::Db(sqlx::Error::PoolClosed));
            }
            self.clicks.lock().await.extend_from_slice(events);
            Ok(())
        }

        async fn add_clicks(&self, short_code: &str, delta_total: i64) -> Result<(), StoreError> {
            if self.fail_add_clicks_for.contains(short_code) {
                return Err(StoreError::Db(sqlx::Error::PoolClosed));
            }
            let mut stats = self.stats.lock().await;
            let entry = stats.entry(short_code.to_string()).or_insert(LinkStats {
                short_code: short_code.to_string(),
                total_clicks: 0,
                unique_visitors: 0,
                last_updated: Utc::now(),
            });
            entry.total_clicks += delta_total;
            Ok(())
        }

        async fn set_unique_visitors(&self, short_code: &str, value: i64) -> Result<(), StoreError> {
            self.set_unique_calls.fetch_add(1, Ordering::SeqCst);
            let mut stats = self.stats.lock().await;
            if let Some(entry) = stats.get_mut(short_code) {
                entry.unique_visitors = value;
            }
            Ok(())
        }

        async fn recount_uniques(&self, short_code: &str) -> Result<i64, StoreError> {
            self.recount_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_recount_for.contains(short_code) {
                return Err(StoreError::Db(sqlx::Error::PoolClosed));
            }
            let clicks = self.clicks.lock().await;
            let distinct: HashSet<&str> = clicks
                .iter()
                .filter(|c| c.short_code == short_code)
                .map(|c| c.visitor_hash.as_str())
                .collect();
            Ok(distinct.len() as i64)
        }

        async fn get_stats(&self, short_code: &str) -> Result<Option<LinkStats>, StoreError> {
            Ok(self.stats.lock().await.get(short_code).cloned())
        }

        async fn upsert_referrer(&self, short_code: &str, referer: &str, delta: i64) -> Result<(), StoreError> {
            *self
                .referrers
                .lock()
                .await
                .entry((short_code.to_string(), referer.to_string()))
                .or_insert(0) += delta;
            Ok(())
        }

        async fn clicks_over_time(&self, _: &str, _: DateTime<Utc>, _: Bucket) -> Result<Vec<TimePoint>, StoreError> {
            Ok(vec![])
        }
        async fn top_referrers(&self, _: &str, _: i64) -> Result<Vec<ReferrerCount>, StoreError> {
            Ok(vec![])
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn test_worker(store: Arc<FakeStore>, broker: Arc<Broker>) -> Worker {
        let (_tx, rx) = async_channel::unbounded();
        Worker::new(
            0,
            rx,
            store,
            broker,
            Arc::new(crate::metrics::init(&prometheus::Registry::new())),
            100,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn failed_batch_insert_abandons_the_whole_batch() {
        let store = Arc::new(FakeStore {
            fail_batch_insert: true,
            ..Default::default()
        });
        let broker = Arc::new(Broker::new());
        let (_id, mut rx) = broker.subscribe("abc123", 4);
        let worker = test_worker(store.clone(), broker.clone());

        let mut batch = vec![event("abc123", ""), event("abc123", "")];
        worker.flush(&mut batch).await;

        assert_eq!(store.batch_insert_calls.load(Ordering::SeqCst), 1);
        assert!(store.get_stats("abc123").await.unwrap().is_none());
        assert!(rx.try_recv().is_err(), "no broadcast should follow an abandoned batch");
    }

    #[tokio::test]
    async fn aggregate_failure_for_one_code_does_not_block_others() {
        let mut store = FakeStore {
            fail_add_clicks_for: HashSet::from(["bad".to_string()]),
            ..Default::default()
        };
        store.seed_stats("bad", 10, 3);
        let store = Arc::new(store);
        let broker = Arc::new(Broker::new());
        let worker = test_worker(store.clone(), broker.clone());

        let mut batch = vec![event("bad", ""), event("good", ""), event("good", "")];
        worker.flush(&mut batch).await;

        // "bad" never got its total bumped (add_clicks failed), "good" did.
        let bad_stats = store.get_stats("bad").await.unwrap().unwrap();
        assert_eq!(bad_stats.total_clicks, 10);
        let good_stats = store.get_stats("good").await.unwrap().unwrap();
        assert_eq!(good_stats.total_clicks, 2);
    }

    #[tokio::test]
    async fn recount_failure_leaves_unique_visitors_unchanged() {
        let mut store = FakeStore {
            fail_recount_for: HashSet::from(["abc123".to_string()]),
            ..Default::default()
        };
        store.seed_stats("abc123", 5, 3);
        let store = Arc::new(store);
        let broker = Arc::new(Broker::new());
        let worker = test_worker(store.clone(), broker.clone());

        let mut batch = vec![event("abc123", ""), event("abc123", "")];
        worker.flush(&mut batch).await;

        let stats = store.get_stats("abc123").await.unwrap().unwrap();
        // total_clicks still advances (add_clicks is independent of recount)...
        assert_eq!(stats.total_clicks, 7);
        // ...but unique_visitors is left at its previous value, not guessed.
        assert_eq!(stats.unique_visitors, 3);
        assert_eq!(store.set_unique_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_flush_broadcasts_updated_total_to_subscribers() {
        let store = Arc::new(FakeStore::default());
        let broker = Arc::new(Broker::new());
        let (_id, mut rx) = broker.subscribe("abc123", 4);
        let worker = test_worker(store.clone(), broker.clone());

        let mut batch = vec![event("abc123", "https://t.co"), event("abc123", "https://t.co")];
        worker.flush(&mut batch).await;

        let frame = rx.try_recv().expect("expected a broadcast frame");
        assert_eq!(frame.short_code, "abc123");
        assert_eq!(frame.total_clicks, 2);
    }
}
