use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Database row for a shortened link. Immutable after creation (§3).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// A click event as it travels Emitted → Queued → Batched → Flushed.
/// Transient: destroyed once the batch containing it is flushed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickEvent {
    pub short_code: String,
    pub timestamp: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    pub referer: String,
    pub visitor_hash: String,
}

/// Aggregate click totals for one short code.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LinkStats {
    pub short_code: String,
    pub total_clicks: i64,
    pub unique_visitors: i64,
    pub last_updated: DateTime<Utc>,
}

/// A single referer's click count for one short code.
#[derive(Debug, Clone, FromRow)]
pub struct ReferrerCount {
    pub short_code: String,
    pub referer: String,
    pub click_count: i64,
}

/// A read-only time-bucketed count, used by the analytics time series.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TimePoint {
    pub bucket_start: DateTime<Utc>,
    pub count: i64,
}

// ── HTTP request/response DTOs ──────────────────────────────────────────────

/// Request body for POST /api/links.
#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub url: String,
    pub user_id: String,
}

/// Response for POST /api/links and GET /api/links/:code.
#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub short_code: String,
    pub short_url: String,
    pub original_url: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl LinkResponse {
    pub fn from_link(link: &Link, base_url: &str) -> Self {
        Self {
            short_code: link.short_code.clone(),
            short_url: format!("{}/{}", base_url.trim_end_matches('/'), link.short_code),
            original_url: link.original_url.clone(),
            user_id: link.user_id.clone(),
            created_at: link.created_at,
        }
    }
}

/// One row of `top_referrers` as returned over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopReferrerEntry {
    pub referer: String,
    pub count: i64,
}

/// One row of `clicks_over_time` as returned over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClicksOverTimeEntry {
    pub timestamp: DateTime<Utc>,
    pub count: i64,
}

/// Response for GET /api/analytics/:code.
#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub short_code: String,
    pub total_clicks: i64,
    pub unique_visitors: i64,
    pub clicks_over_time: Vec<ClicksOverTimeEntry>,
    pub top_referrers: Vec<TopReferrerEntry>,
    pub click_rate: f64,
    pub peak_hour: Option<DateTime<Utc>>,
}

/// Accepted `period` query values for GET /api/analytics/:code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsPeriod {
    Day,
    Week,
    Month,
}

impl AnalyticsPeriod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "24h" => Some(Self::Day),
            "7d" => Some(Self::Week),
            "30d" => Some(Self::Month),
            _ => None,
        }
    }
}

/// Data frame pushed over the subscription stream (§4.6, §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFrame {
    pub short_code: String,
    pub timestamp: DateTime<Utc>,
    pub total_clicks: i64,
}

/// Health check status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub cache: HealthStatus,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub l1_entries: usize,
}
