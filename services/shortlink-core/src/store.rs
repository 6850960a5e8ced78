use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::models::{ClickEvent, Link, LinkStats, ReferrerCount, TimePoint};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("short code already exists")]
    Collision,
    #[error("store error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Granularity for the `clicks_over_time` bucketing — 1h for the 24h
/// period, 1 day for the 7d/30d periods (§6.2).
#[derive(Debug, Clone, Copy)]
pub enum Bucket {
    Hour,
    Day,
}

impl Bucket {
    fn trunc_unit(self) -> &'static str {
        match self {
            Bucket::Hour => "hour",
            Bucket::Day => "day",
        }
    }
}

/// Narrow behavior set the core depends on for the durable store (§9): no
/// method here is specific to Postgres, so a different backend could
/// implement this trait without touching the rest of the service.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn insert_link(
        &self,
        short_code: &str,
        original_url: &str,
        user_id: &str,
    ) -> Result<Link, StoreError>;
    async fn get_by_code(&self, short_code: &str) -> Result<Option<Link>, StoreError>;
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Link>, StoreError>;
    async fn get_all_links(&self) -> Result<Vec<Link>, StoreError>;

    async fn batch_insert_clicks(&self, events: &[ClickEvent]) -> Result<(), StoreError>;
    async fn add_clicks(&self, short_code: &str, delta_total: i64) -> Result<(), StoreError>;
    async fn set_unique_visitors(&self, short_code: &str, value: i64) -> Result<(), StoreError>;
    async fn recount_uniques(&self, short_code: &str) -> Result<i64, StoreError>;
    async fn get_stats(&self, short_code: &str) -> Result<Option<LinkStats>, StoreError>;
    async fn upsert_referrer(
        &self,
        short_code: &str,
        referer: &str,
        delta: i64,
    ) -> Result<(), StoreError>;

    async fn clicks_over_time(
        &self,
        short_code: &str,
        since: DateTime<Utc>,
        bucket: Bucket,
    ) -> Result<Vec<TimePoint>, StoreError>;
    async fn top_referrers(
        &self,
        short_code: &str,
        limit: i64,
    ) -> Result<Vec<ReferrerCount>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(200)
        .min_connections(50)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    // Advisory lock so only one replica runs DDL when several instances start simultaneously.
    sqlx::query("SELECT pg_advisory_lock(12345678)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            id           BIGSERIAL PRIMARY KEY,
            short_code   VARCHAR(20) NOT NULL UNIQUE,
            original_url TEXT NOT NULL,
            user_id      TEXT NOT NULL,
            created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_user_id ON links(user_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_links_user_created ON links(user_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clicks (
            id           BIGSERIAL PRIMARY KEY,
            short_code   VARCHAR(20) NOT NULL,
            clicked_at   TIMESTAMPTZ NOT NULL,
            ip_address   TEXT NOT NULL,
            user_agent   TEXT NOT NULL,
            referer      TEXT NOT NULL,
            visitor_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_clicks_code_time ON clicks(short_code, clicked_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_clicks_time ON clicks(clicked_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS link_stats (
            short_code      VARCHAR(20) PRIMARY KEY,
            total_clicks    BIGINT NOT NULL DEFAULT 0,
            unique_visitors BIGINT NOT NULL DEFAULT 0,
            last_updated    TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS top_referrers (
            short_code  VARCHAR(20) NOT NULL,
            referer     TEXT NOT NULL,
            click_count BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (short_code, referer)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_top_referrers_count ON top_referrers(short_code, click_count DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("SELECT pg_advisory_unlock(12345678)")
        .execute(pool)
        .await?;

    Ok(())
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PrimaryStore for PgStore {
    async fn insert_link(
        &self,
        short_code: &str,
        original_url: &str,
        user_id: &str,
    ) -> Result<Link, StoreError> {
        let result = sqlx::query_as::<_, Link>(
            r#"
            INSERT INTO links (short_code, original_url, user_id)
            VALUES ($1, $2, $3)
            RETURNING id, short_code, original_url, user_id, created_at
            "#,
        )
        .bind(short_code)
        .bind(original_url)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(link) => Ok(link),
            Err(sqlx::Error::Database(db_err)) if db_err.kind() == ErrorKind::UniqueViolation => {
                Err(StoreError::Collision)
            }
            Err(e) => Err(StoreError::Db(e)),
        }
    }

    async fn get_by_code(&self, short_code: &str) -> Result<Option<Link>, StoreError> {
        let link = sqlx::query_as::<_, Link>(
            "SELECT id, short_code, original_url, user_id, created_at FROM links WHERE short_code = $1",
        )
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(link)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Link>, StoreError> {
        let links = sqlx::query_as::<_, Link>(
            "SELECT id, short_code, original_url, user_id, created_at FROM links WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    async fn get_all_links(&self) -> Result<Vec<Link>, StoreError> {
        let links = sqlx::query_as::<_, Link>(
            "SELECT id, short_code, original_url, user_id, created_at FROM links",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    async fn batch_insert_clicks(&self, events: &[ClickEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let short_codes: Vec<&str> = events.iter().map(|e| e.short_code.as_str()).collect();
        let timestamps: Vec<DateTime<Utc>> = events.iter().map(|e| e.timestamp).collect();
        let ips: Vec<&str> = events.iter().map(|e| e.ip_address.as_str()).collect();
        let uas: Vec<&str> = events.iter().map(|e| e.user_agent.as_str()).collect();
        let referers: Vec<&str> = events.iter().map(|e| e.referer.as_str()).collect();
        let visitor_hashes: Vec<&str> = events.iter().map(|e| e.visitor_hash.as_str()).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO clicks (short_code, clicked_at, ip_address, user_agent, referer, visitor_hash)
            SELECT * FROM UNNEST($1::text[], $2::timestamptz[], $3::text[], $4::text[], $5::text[], $6::text[])
            "#,
        )
        .bind(&short_codes)
        .bind(&timestamps)
        .bind(&ips)
        .bind(&uas)
        .bind(&referers)
        .bind(&visitor_hashes)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_clicks(&self, short_code: &str, delta_total: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO link_stats (short_code, total_clicks, unique_visitors, last_updated)
            VALUES ($1, $2, 0, now())
            ON CONFLICT (short_code) DO UPDATE
                SET total_clicks = link_stats.total_clicks + EXCLUDED.total_clicks,
                    last_updated = now()
            "#,
        )
        .bind(short_code)
        .bind(delta_total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_unique_visitors(&self, short_code: &str, value: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE link_stats SET unique_visitors = $2, last_updated = now() WHERE short_code = $1",
        )
        .bind(short_code)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recount_uniques(&self, short_code: &str) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT visitor_hash) FROM clicks WHERE short_code = $1")
                .bind(short_code)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn get_stats(&self, short_code: &str) -> Result<Option<LinkStats>, StoreError> {
        let stats = sqlx::query_as::<_, LinkStats>(
            "SELECT short_code, total_clicks, unique_visitors, last_updated FROM link_stats WHERE short_code = $1",
        )
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn upsert_referrer(
        &self,
        short_code: &str,
        referer: &str,
        delta: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO top_referrers (short_code, referer, click_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (short_code, referer) DO UPDATE
                SET click_count = top_referrers.click_count + EXCLUDED.click_count
            "#,
        )
        .bind(short_code)
        .bind(referer)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clicks_over_time(
        &self,
        short_code: &str,
        since: DateTime<Utc>,
        bucket: Bucket,
    ) -> Result<Vec<TimePoint>, StoreError> {
        let sql = format!(
            "SELECT date_trunc('{}', clicked_at) AS bucket_start, COUNT(*) AS count \
             FROM clicks WHERE short_code = $1 AND clicked_at >= $2 \
             GROUP BY bucket_start ORDER BY bucket_start ASC",
            bucket.trunc_unit()
        );
        let points = sqlx::query_as::<_, TimePoint>(&sql)
            .bind(short_code)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(points)
    }

    async fn top_referrers(
        &self,
        short_code: &str,
        limit: i64,
    ) -> Result<Vec<ReferrerCount>, StoreError> {
        let rows = sqlx::query_as::<_, ReferrerCount>(
            "SELECT short_code, referer, click_count FROM top_referrers \
             WHERE short_code = $1 ORDER BY click_count DESC, referer ASC LIMIT $2",
        )
        .bind(short_code)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
