use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

/// Narrow behavior set the core depends on for the remote KV (§9): a warm
/// write-through cache plus realtime counters. Never consulted on the
/// redirect read path (§4.1 step 2 / Open Question in §9) — only written
/// through asynchronously.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()>;
    async fn incr(&self, key: &str, delta: i64) -> anyhow::Result<i64>;
    async fn expire(&self, key: &str, ttl_seconds: u64) -> anyhow::Result<()>;
    async fn ping(&self) -> anyhow::Result<()>;
}

/// Redis-backed implementation. Every call is wrapped in the configured
/// per-op timeout (§5: "Remote KV read/write: 200ms each") so a stalled
/// backend can never hold up a caller indefinitely. Reads prefer an
/// optional replica connection when one is configured; writes always go to
/// the primary (SPEC_FULL.md §G read-replica split).
pub struct RedisCache {
    primary: Mutex<ConnectionManager>,
    replica: Option<Mutex<ConnectionManager>>,
    op_timeout: Duration,
}

impl RedisCache {
    pub async fn connect(url: &str, op_timeout: Duration) -> anyhow::Result<Self> {
        Self::connect_with_replica(url, None, op_timeout).await
    }

    pub async fn connect_with_replica(
        url: &str,
        replica_url: Option<&str>,
        op_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let primary = ConnectionManager::new(client).await?;
        let replica = match replica_url {
            Some(replica_url) => {
                let client = redis::Client::open(replica_url)?;
                Some(Mutex::new(ConnectionManager::new(client).await?))
            }
            None => None,
        };
        Ok(Self {
            primary: Mutex::new(primary),
            replica,
            op_timeout,
        })
    }

    fn read_conn(&self) -> &Mutex<ConnectionManager> {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    async fn with_timeout<F, T>(&self, fut: F) -> anyhow::Result<T>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| anyhow::anyhow!("remote cache op timed out"))?
    }
}

pub fn url_cache_key(short_code: &str) -> String {
    format!("link:{short_code}")
}

pub fn realtime_counter_key(short_code: &str) -> String {
    format!("clicks:realtime:{short_code}")
}

#[async_trait]
impl RemoteCache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let fut = async {
            let mut conn = self.read_conn().lock().await;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        };
        self.with_timeout(fut).await.ok().flatten()
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        let fut = async {
            let mut conn = self.primary.lock().await;
            let _: () = conn.set_ex(key, value, ttl_seconds).await?;
            Ok(())
        };
        self.with_timeout(fut).await
    }

    async fn incr(&self, key: &str, delta: i64) -> anyhow::Result<i64> {
        let fut = async {
            let mut conn = self.primary.lock().await;
            let count: i64 = conn.incr(key, delta).await?;
            Ok(count)
        };
        self.with_timeout(fut).await
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        let fut = async {
            let mut conn = self.primary.lock().await;
            let _: () = conn.expire(key, ttl_seconds as i64).await?;
            Ok(())
        };
        self.with_timeout(fut).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let fut = async {
            let mut conn = self.primary.lock().await;
            let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
            Ok(())
        };
        self.with_timeout(fut).await
    }
}

/// Bump `clicks:realtime:<code>`, applying the TTL only on the increment
/// that creates the key (§6.3: "TTL 60s on first bump").
pub async fn bump_realtime_counter(
    cache: &dyn RemoteCache,
    short_code: &str,
    ttl_seconds: u64,
) -> anyhow::Result<i64> {
    let key = realtime_counter_key(short_code);
    let count = cache.incr(&key, 1).await?;
    if count == 1 {
        cache.expire(&key, ttl_seconds).await?;
    }
    Ok(count)
}
