use std::time::Duration;

/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub app_env: String,
    pub base_url: String,
    pub frontend_url: String,
    pub port: u16,

    pub database_url: String,

    pub redis_url: String,
    pub redis_replica_url: Option<String>,

    pub short_code_length: usize,
    pub short_code_max_retries: u32,

    pub ingest_queue_capacity: usize,
    pub worker_count: usize,
    pub batch_size: usize,
    pub batch_timeout: Duration,

    pub resolver_store_timeout: Duration,
    pub remote_cache_timeout: Duration,
    pub remote_cache_pool_wait: Duration,
    pub remote_url_ttl_seconds: u64,
    pub realtime_counter_ttl_seconds: u64,

    pub mailbox_capacity: usize,
    pub heartbeat_interval: Duration,
    pub shutdown_drain: Duration,
    pub shutdown_timeout: Duration,
}

fn env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("Missing env var: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut database_url = env("DATABASE_URL")?;
        // sqlx requires postgresql:// not postgresql+asyncpg:// (common upstream driver prefix)
        database_url = database_url.replace("postgresql+asyncpg://", "postgresql://");
        Ok(Self {
            app_name: env_or("APP_NAME", "shortlink-core"),
            app_env: env_or("ENV", "development"),
            base_url: env_or("BASE_URL", "http://localhost:8080"),
            frontend_url: env_or("FRONTEND_URL", "http://localhost:5173"),
            port: env_parse("PORT", 8080),
            database_url,
            redis_url: env_or("REDIS_URL", "localhost:6379"),
            redis_replica_url: std::env::var("REDIS_REPLICA_URL").ok(),
            short_code_length: env_parse("SHORT_CODE_LENGTH", 6),
            short_code_max_retries: env_parse("SHORT_CODE_MAX_RETRIES", 5),
            ingest_queue_capacity: env_parse("INGEST_QUEUE_CAPACITY", 10_000),
            worker_count: env_parse("WORKER_COUNT", 10),
            batch_size: env_parse("BATCH_SIZE", 100),
            batch_timeout: Duration::from_millis(env_parse("BATCH_TIMEOUT_MS", 5_000)),
            resolver_store_timeout: Duration::from_millis(env_parse(
                "RESOLVER_STORE_TIMEOUT_MS",
                500,
            )),
            remote_cache_timeout: Duration::from_millis(env_parse(
                "REMOTE_CACHE_TIMEOUT_MS",
                200,
            )),
            remote_cache_pool_wait: Duration::from_millis(env_parse(
                "REMOTE_CACHE_POOL_WAIT_MS",
                50,
            )),
            remote_url_ttl_seconds: env_parse("REMOTE_URL_TTL_SECONDS", 3_600),
            realtime_counter_ttl_seconds: env_parse("REALTIME_COUNTER_TTL_SECONDS", 60),
            mailbox_capacity: env_parse("MAILBOX_CAPACITY", 10),
            heartbeat_interval: Duration::from_secs(env_parse("HEARTBEAT_INTERVAL_SECONDS", 30)),
            shutdown_drain: Duration::from_millis(env_parse("SHUTDOWN_DRAIN_MS", 2_000)),
            shutdown_timeout: Duration::from_millis(env_parse("SHUTDOWN_TIMEOUT_MS", 10_000)),
        })
    }
}
