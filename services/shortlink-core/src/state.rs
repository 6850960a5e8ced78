use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use prometheus::Registry;

use crate::broker::Broker;
use crate::config::Config;
use crate::l1_cache::L1Cache;
use crate::metrics::AppMetrics;
use crate::queue::IngestQueue;
use crate::remote_cache::RemoteCache;
use crate::resolver::Resolver;
use crate::store::PrimaryStore;

/// Shared application state injected into every handler via axum's `State`
/// extractor. Depends on `PrimaryStore`/`RemoteCache` through their trait
/// objects (§9), never on `PgStore`/`RedisCache` directly.
pub struct AppState {
    pub config: Config,
    pub l1: Arc<L1Cache>,
    pub store: Arc<dyn PrimaryStore>,
    pub remote: Arc<dyn RemoteCache>,
    pub resolver: Arc<Resolver>,
    pub queue: IngestQueue,
    pub broker: Arc<Broker>,
    pub metrics: Arc<AppMetrics>,
    pub registry: Registry,
    /// Set once L1 pre-population (`Resolver::warm_l1`) has completed.
    /// `/ready` reports readiness from this flag rather than from L1
    /// occupancy, since a store with zero links yet is still fully warmed
    /// (SPEC_FULL.md §E).
    warmed: AtomicBool,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        l1: Arc<L1Cache>,
        store: Arc<dyn PrimaryStore>,
        remote: Arc<dyn RemoteCache>,
        resolver: Arc<Resolver>,
        queue: IngestQueue,
        broker: Arc<Broker>,
        metrics: Arc<AppMetrics>,
        registry: Registry,
        warmed: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            l1,
            store,
            remote,
            resolver,
            queue,
            broker,
            metrics,
            registry,
            warmed: AtomicBool::new(warmed),
        })
    }

    pub fn is_warmed(&self) -> bool {
        self.warmed.load(Ordering::Acquire)
    }
}
