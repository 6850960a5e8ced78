use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Ambient Prometheus metrics for every moving part of the redirect and
/// analytics pipelines (SPEC_FULL.md §E). Owned rather than a process-wide
/// singleton so tests can build a fresh registry per case.
pub struct AppMetrics {
    pub redirect_total: IntCounterVec,
    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    pub queue_offered_total: IntCounter,
    pub queue_dropped_total: IntCounter,
    pub queue_depth: IntGauge,
    pub flush_total: IntCounter,
    pub flush_failures: IntCounter,
    pub flush_batch_size: Histogram,
    pub flush_duration_seconds: Histogram,
    pub broker_broadcast_total: IntCounter,
    pub broker_mailbox_full_total: IntCounter,
    pub http_requests_total: IntCounterVec,
}

pub fn init(registry: &Registry) -> AppMetrics {
    let redirect_total = IntCounterVec::new(
        Opts::new("shortlink_redirect_total", "Redirects by outcome status"),
        &["status"],
    )
    .unwrap();
    let cache_hits_total = IntCounter::with_opts(Opts::new(
        "shortlink_cache_hits_total",
        "L1 cache hits on the redirect path",
    ))
    .unwrap();
    let cache_misses_total = IntCounter::with_opts(Opts::new(
        "shortlink_cache_misses_total",
        "L1 cache misses on the redirect path",
    ))
    .unwrap();
    let queue_offered_total = IntCounter::with_opts(Opts::new(
        "shortlink_queue_offered_total",
        "Click events offered to the ingest queue",
    ))
    .unwrap();
    let queue_dropped_total = IntCounter::with_opts(Opts::new(
        "shortlink_queue_dropped_total",
        "Click events dropped because the ingest queue was full",
    ))
    .unwrap();
    let queue_depth = IntGauge::with_opts(Opts::new(
        "shortlink_queue_depth",
        "Current number of events waiting in the ingest queue",
    ))
    .unwrap();
    let flush_total = IntCounter::with_opts(Opts::new(
        "shortlink_flush_total",
        "Batches flushed by worker pool",
    ))
    .unwrap();
    let flush_failures = IntCounter::with_opts(Opts::new(
        "shortlink_flush_failures_total",
        "Batch flushes that failed to insert",
    ))
    .unwrap();
    let flush_batch_size = Histogram::with_opts(HistogramOpts::new(
        "shortlink_flush_batch_size",
        "Size of flushed batches",
    ))
    .unwrap();
    let flush_duration_seconds = Histogram::with_opts(HistogramOpts::new(
        "shortlink_flush_duration_seconds",
        "Time spent flushing one batch",
    ))
    .unwrap();
    let broker_broadcast_total = IntCounter::with_opts(Opts::new(
        "shortlink_broker_broadcast_total",
        "Stream frames delivered to subscriber mailboxes",
    ))
    .unwrap();
    let broker_mailbox_full_total = IntCounter::with_opts(Opts::new(
        "shortlink_broker_mailbox_full_total",
        "Stream frames dropped due to a full subscriber mailbox",
    ))
    .unwrap();
    let http_requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "HTTP requests by handler and status"),
        &["handler", "method", "status_code"],
    )
    .unwrap();

    registry.register(Box::new(redirect_total.clone())).ok();
    registry.register(Box::new(cache_hits_total.clone())).ok();
    registry.register(Box::new(cache_misses_total.clone())).ok();
    registry.register(Box::new(queue_offered_total.clone())).ok();
    registry.register(Box::new(queue_dropped_total.clone())).ok();
    registry.register(Box::new(queue_depth.clone())).ok();
    registry.register(Box::new(flush_total.clone())).ok();
    registry.register(Box::new(flush_failures.clone())).ok();
    registry.register(Box::new(flush_batch_size.clone())).ok();
    registry
        .register(Box::new(flush_duration_seconds.clone()))
        .ok();
    registry
        .register(Box::new(broker_broadcast_total.clone()))
        .ok();
    registry
        .register(Box::new(broker_mailbox_full_total.clone()))
        .ok();
    registry.register(Box::new(http_requests_total.clone())).ok();

    AppMetrics {
        redirect_total,
        cache_hits_total,
        cache_misses_total,
        queue_offered_total,
        queue_dropped_total,
        queue_depth,
        flush_total,
        flush_failures,
        flush_batch_size,
        flush_duration_seconds,
        broker_broadcast_total,
        broker_mailbox_full_total,
        http_requests_total,
    }
}

pub fn gather(registry: &Registry) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&registry.gather(), &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}
