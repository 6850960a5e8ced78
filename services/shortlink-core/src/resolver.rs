use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::l1_cache::L1Cache;
use crate::remote_cache::{url_cache_key, RemoteCache};
use crate::store::PrimaryStore;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("short code not found")]
    NotFound,
    #[error("primary store did not answer within the deadline")]
    Timeout,
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// C4: the two-tier read path. L1 is process-local and consulted first;
/// a miss falls through to the Primary Store under a hard deadline (§4.1,
/// §5). The remote KV is never read here (§9 Open Question) — only
/// written through, asynchronously, after a Primary Store hit.
pub struct Resolver {
    l1: Arc<L1Cache>,
    store: Arc<dyn PrimaryStore>,
    remote: Arc<dyn RemoteCache>,
    store_timeout: Duration,
    remote_url_ttl_seconds: u64,
}

impl Resolver {
    pub fn new(
        l1: Arc<L1Cache>,
        store: Arc<dyn PrimaryStore>,
        remote: Arc<dyn RemoteCache>,
        store_timeout: Duration,
        remote_url_ttl_seconds: u64,
    ) -> Self {
        Self {
            l1,
            store,
            remote,
            store_timeout,
            remote_url_ttl_seconds,
        }
    }

    pub async fn resolve(&self, short_code: &str) -> Result<String, ResolveError> {
        if let Some(url) = self.l1.get(short_code) {
            return Ok(url);
        }

        let lookup = tokio::time::timeout(self.store_timeout, self.store.get_by_code(short_code));
        let link = match lookup.await {
            Ok(result) => result?,
            Err(_) => return Err(ResolveError::Timeout),
        };

        let Some(link) = link else {
            return Err(ResolveError::NotFound);
        };

        self.l1.insert(link.short_code.clone(), link.original_url.clone());
        self.spawn_write_through(link.short_code.clone(), link.original_url.clone());

        Ok(link.original_url)
    }

    /// Pre-populate L1 from every existing link at startup so the first
    /// request for an old code never has to wait on the Primary Store
    /// (§4.1 design note).
    pub async fn warm_l1(&self) -> anyhow::Result<usize> {
        let links = self.store.get_all_links().await?;
        let count = links.len();
        for link in links {
            self.l1.insert(link.short_code, link.original_url);
        }
        Ok(count)
    }

    fn spawn_write_through(&self, short_code: String, original_url: String) {
        let remote = self.remote.clone();
        let ttl = self.remote_url_ttl_seconds;
        tokio::spawn(async move {
            let key = url_cache_key(&short_code);
            if let Err(err) = remote.set_with_ttl(&key, &original_url, ttl).await {
                warn!(short_code, %err, "remote cache write-through failed");
            }
        });
    }
}
