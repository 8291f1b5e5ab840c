use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{Method, header};
use serde::{Deserialize, Serialize};

use crate::{
    services::cache::response_key,
    services::session::SessionRecord,
    state::AppState,
};

/// Response bodies above this size are passed through uncached.
const MAX_CACHEABLE_BODY: usize = 1024 * 1024;

/// The stored form of a cached response: enough to replay it verbatim.
#[derive(Serialize, Deserialize)]
struct CachedResponse {
    status: u16,
    content_type: Option<String>,
    body: String,
}

impl CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = (status, self.body).into_response();
        let headers = response.headers_mut();
        if let Some(content_type) = self
            .content_type
            .and_then(|ct| header::HeaderValue::from_str(&ct).ok())
        {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        headers.insert("x-cache", header::HeaderValue::from_static("HIT"));
        response
    }
}

/// Read-through wrapper for GET handlers.
///
/// On hit the stored body is replayed with its original status; on miss
/// the handler runs and a 2xx response is stored for next time. Only
/// idempotent reads may be wrapped. An unreachable KVS degrades to
/// always-miss: the handler simply runs every time.
async fn respond_cached(
    state: AppState,
    ttl_secs: u64,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let subject = req
        .extensions()
        .get::<SessionRecord>()
        .map(|session| session.user_id.to_string());
    let key = response_key(&target, subject.as_deref());

    if let Some(raw) = state.cache.get(&key).await {
        match sonic_rs::from_str::<CachedResponse>(&raw) {
            Ok(cached) => {
                tracing::debug!("✅ Cache hit for {}", target);
                return cached.into_response();
            }
            Err(e) => {
                tracing::warn!("⚠️ Corrupt cache entry {}, deleting: {}", key, e);
                state.cache.delete(&[key.clone()]).await;
            }
        }
    }

    let response = next.run(req).await;
    if !response.status().is_success() {
        return response;
    }

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

    if bytes.len() <= MAX_CACHEABLE_BODY {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            let entry = CachedResponse {
                status,
                content_type,
                body: text.to_string(),
            };
            if let Ok(payload) = sonic_rs::to_string(&entry) {
                state.cache.set(&key, &payload, Some(ttl_secs)).await;
            }
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Caches near-static reads (published prompts, public profiles) for the
/// long duration class.
pub async fn cache_near_static(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ttl = state.config.cache_ttls.long;
    respond_cached(state, ttl, req, next).await
}

/// Caches semi-dynamic reads (listings, feeds) for the medium duration
/// class.
pub async fn cache_semi_dynamic(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ttl = state.config.cache_ttls.medium;
    respond_cached(state, ttl, req, next).await
}

/// Caches search results for the short duration class.
pub async fn cache_short(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ttl = state.config.cache_ttls.short;
    respond_cached(state, ttl, req, next).await
}
