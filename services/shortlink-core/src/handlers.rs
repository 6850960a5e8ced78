//! HTTP handlers for the link-shortening and click-analytics service.
//!
//! # Flow: redirect (hot path)
//! ```text
//! GET /:code → L1 cache? → hit: 302 + spawn click event
//!                        → miss: Primary Store (500ms deadline) → populate
//!                          L1 → write-through remote KV (async) → 302
//! ```
//!
//! # Flow: create link
//! ```text
//! POST /api/links → generate short code → insert (retry on collision,
//! up to SHORT_CODE_MAX_RETRIES) → populate L1 → 201
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use tracing::{error, warn};

use crate::analytics;
use crate::error::AppError;
use crate::models::{
    AnalyticsPeriod, AnalyticsResponse, ClickEvent, CreateLinkRequest, HealthResponse,
    HealthStatus, LinkResponse, ReadyResponse, StreamFrame,
};
use crate::remote_cache::{bump_realtime_counter, realtime_counter_key, RemoteCache};
use crate::shortcode::{generate_short_code, hash_visitor};
use crate::state::AppState;
use crate::store::PrimaryStore;

// ── Health / readiness / metrics ────────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db_status = match state.store.ping().await {
        Ok(()) => HealthStatus::Healthy,
        Err(_) => HealthStatus::Unhealthy,
    };
    let cache_status = match state.remote.ping().await {
        Ok(()) => HealthStatus::Healthy,
        Err(_) => HealthStatus::Unhealthy,
    };
    let overall = if db_status == HealthStatus::Healthy && cache_status == HealthStatus::Healthy {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    Json(HealthResponse {
        status: overall,
        database: db_status,
        cache: cache_status,
    })
}

pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: state.is_warmed(),
        l1_entries: state.l1.len(),
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    crate::metrics::gather(&state.registry)
}

// ── POST /api/links ──────────────────────────────────────────────────────────

pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateLinkRequest>,
) -> Result<Response, AppError> {
    if payload.url.trim().is_empty() {
        return Err(AppError::Validation("url must not be empty".into()));
    }
    if url::Url::parse(&payload.url).is_err() {
        return Err(AppError::Validation(format!(
            "'{}' is not a valid URL",
            payload.url
        )));
    }

    let mut attempt = 0;
    let link = loop {
        let candidate = generate_short_code(state.config.short_code_length);
        match state
            .store
            .insert_link(&candidate, &payload.url, &payload.user_id)
            .await
        {
            Ok(link) => break link,
            Err(crate::store::StoreError::Collision) => {
                attempt += 1;
                warn!(candidate, attempt, "short code collision, retrying");
                if attempt >= state.config.short_code_max_retries {
                    return Err(AppError::Collision);
                }
            }
            Err(e) => return Err(e.into()),
        }
    };

    state.l1.insert(link.short_code.clone(), link.original_url.clone());
    state
        .metrics
        .http_requests_total
        .with_label_values(&["create_link", "POST", "201"])
        .inc();

    let resp = LinkResponse::from_link(&link, &state.config.base_url);
    Ok((StatusCode::CREATED, Json(resp)).into_response())
}

// ── GET /api/links/:code ─────────────────────────────────────────────────────

pub async fn get_link(
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
) -> Result<Json<LinkResponse>, AppError> {
    let link = state
        .store
        .get_by_code(&short_code)
        .await?
        .ok_or(AppError::NotFound)?;
    state
        .metrics
        .http_requests_total
        .with_label_values(&["get_link", "GET", "200"])
        .inc();
    Ok(Json(LinkResponse::from_link(&link, &state.config.base_url)))
}

// ── GET /api/links?user_id= ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListLinksQuery {
    pub user_id: String,
}

pub async fn list_links(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListLinksQuery>,
) -> Result<Json<Vec<LinkResponse>>, AppError> {
    let links = state.store.list_by_user(&query.user_id).await?;
    let responses = links
        .iter()
        .map(|l| LinkResponse::from_link(l, &state.config.base_url))
        .collect();
    state
        .metrics
        .http_requests_total
        .with_label_values(&["list_links", "GET", "200"])
        .inc();
    Ok(Json(responses))
}

// ── GET /:code (redirect, hot path) ──────────────────────────────────────────

pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let hit_before_resolve = state.l1.get(&short_code).is_some();

    match state.resolver.resolve(&short_code).await {
        Ok(original_url) => {
            if hit_before_resolve {
                state.metrics.cache_hits_total.inc();
            } else {
                state.metrics.cache_misses_total.inc();
            }
            state
                .metrics
                .redirect_total
                .with_label_values(&["302"])
                .inc();

            record_click(&state, &short_code, &addr, &headers);
            // 302 Found, not axum's `Redirect::temporary` (307) — the spec
            // fixes this at 302 so the client re-resolves on future visits
            // if the link ever changes (§4.5 step 3, §9 Open Question).
            (StatusCode::FOUND, [(header::LOCATION, original_url)]).into_response()
        }
        Err(err) => {
            let status = match &err {
                crate::resolver::ResolveError::NotFound => "404",
                // A resolver timeout maps to `AppError::TransientStore`, which
                // `IntoResponse` renders as 500 (error.rs), not 504 — §7's
                // taxonomy has no 504 anywhere, so the metric must agree with
                // the status actually written to the wire.
                crate::resolver::ResolveError::Timeout => "500",
                crate::resolver::ResolveError::Store(_) => "500",
            };
            state.metrics.redirect_total.with_label_values(&[status]).inc();
            AppError::from(err).into_response()
        }
    }
}

// ── POST /api/track/:code (alternate ingestion path) ─────────────────────────

pub async fn track(
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    if state.store.get_by_code(&short_code).await?.is_none() {
        return Err(AppError::NotFound);
    }
    record_click(&state, &short_code, &addr, &headers);
    state
        .metrics
        .http_requests_total
        .with_label_values(&["track", "POST", "200"])
        .inc();
    Ok(StatusCode::OK)
}

fn record_click(state: &AppState, short_code: &str, addr: &SocketAddr, headers: &HeaderMap) {
    let ip_address = addr.ip().to_string();
    let user_agent = header_str(headers, "user-agent");
    let referer = header_str(headers, "referer");
    let visitor_hash = hash_visitor(&ip_address, &user_agent);

    let event = ClickEvent {
        short_code: short_code.to_string(),
        timestamp: Utc::now(),
        ip_address,
        user_agent,
        referer,
        visitor_hash,
    };

    state.metrics.queue_offered_total.inc();
    if !state.queue.offer(event) {
        state.metrics.queue_dropped_total.inc();
    }
    state.metrics.queue_depth.set(state.queue.len() as i64);

    // Best-effort realtime counter bump, spawned so it never delays the
    // response that already went out (§4.5 step 4d).
    let remote = state.remote.clone();
    let ttl = state.config.realtime_counter_ttl_seconds;
    let code = short_code.to_string();
    tokio::spawn(async move {
        if let Err(err) = bump_realtime_counter(remote.as_ref(), &code, ttl).await {
            warn!(short_code = %code, %err, "failed to bump realtime counter");
        }
    });
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

// ── GET /api/analytics/:code ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(default = "default_period")]
    pub period: String,
}

fn default_period() -> String {
    "24h".to_string()
}

pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsResponse>, AppError> {
    let period = AnalyticsPeriod::parse(&query.period)
        .ok_or_else(|| AppError::Validation(format!("unknown period '{}'", query.period)))?;

    if state.store.get_by_code(&short_code).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let stats = state.store.get_stats(&short_code).await?;
    let (total_clicks, unique_visitors) = stats
        .map(|s| (s.total_clicks, s.unique_visitors))
        .unwrap_or((0, 0));

    let since = analytics::since_for(period, Utc::now());
    let (_, bucket) = analytics::window_for(period);
    let points = state
        .store
        .clicks_over_time(&short_code, since, bucket)
        .await?;
    let clicks_over_time = analytics::to_entries(points);

    let referrer_rows = state.store.top_referrers(&short_code, 10).await?;
    let top_referrers = analytics::to_referrer_entries(referrer_rows);

    let click_rate = analytics::click_rate(period, total_clicks);
    let peak_hour = analytics::peak_hour(&clicks_over_time);

    state
        .metrics
        .http_requests_total
        .with_label_values(&["get_analytics", "GET", "200"])
        .inc();

    Ok(Json(AnalyticsResponse {
        short_code,
        total_clicks,
        unique_visitors,
        clicks_over_time,
        top_referrers,
        click_rate,
        peak_hour,
    }))
}

// ── GET /api/analytics/:code/stream (SSE) ────────────────────────────────────

pub async fn stream_analytics(
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, AppError> {
    if state.store.get_by_code(&short_code).await?.is_none() {
        return Err(AppError::NotFound);
    }

    // Initial frame: authoritative LinkStats if a flush has already run for
    // this code, otherwise the realtime counter (§4.6 step 2).
    let initial_total = match state.store.get_stats(&short_code).await {
        Ok(Some(stats)) => stats.total_clicks,
        Ok(None) => state
            .remote
            .get(&realtime_counter_key(&short_code))
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        Err(err) => {
            warn!(%short_code, %err, "failed to read stats for stream snapshot");
            0
        }
    };
    let initial_frame = StreamFrame {
        short_code: short_code.clone(),
        timestamp: Utc::now(),
        total_clicks: initial_total,
    };

    // Held by value inside the generator below; its `Drop` deregisters the
    // mailbox on client disconnect, batch-flush races aside.
    let mut subscription = state
        .broker
        .subscribe_guarded(&short_code, state.config.mailbox_capacity);

    let stream = async_stream::stream! {
        match serde_json::to_string(&initial_frame) {
            Ok(json) => yield Ok(Event::default().event("stats").data(json)),
            Err(err) => error!(%err, "failed to serialize initial stream frame"),
        }

        while let Some(frame) = subscription.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => yield Ok(Event::default().event("stats").data(json)),
                Err(err) => error!(%err, "failed to serialize stream frame"),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.config.heartbeat_interval)
            .text("heartbeat"),
    ))
}
