use axum::{
    Extension,
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::{
    error::AppError,
    services::rate_limit::{CountMode, RateLimitPolicy},
    services::session::SessionRecord,
    state::AppState,
};

/// Extracts the real IP address from the request extensions.
///
/// # Arguments
///
/// * `req` - The incoming request.
///
/// # Returns
///
/// The IP address as a string, or "unknown" if not found.
fn extract_real_ip(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Checks the policy before dispatch and counts after the response.
///
/// The check is read-only; the counter moves at most once per request,
/// after the outcome is known, and only if the policy's count mode says
/// this outcome counts. Allowed responses carry the remaining quota and
/// reset time; denials are 429 with a retry hint.
async fn enforce(
    state: &AppState,
    policy: &RateLimitPolicy,
    derived_key: String,
    req: Request<Body>,
    next: Next,
) -> Response {
    let decision = state.rate_limiter.check(policy, &derived_key).await;

    if !decision.allowed {
        return AppError::RateLimited {
            message: format!(
                "Too many requests. Try again in {} seconds",
                decision.retry_after_secs
            ),
            limit: decision.limit,
            retry_after_secs: decision.retry_after_secs,
            reset_epoch_secs: decision.reset_epoch_secs,
        }
        .into_response();
    }

    let mut response = next.run(req).await;

    let status = response.status();
    let counted = match policy.count_mode {
        CountMode::Always => true,
        CountMode::FailuresOnly => status.is_client_error(),
        CountMode::SuccessesOnly => status.is_success(),
    };

    if counted {
        state.rate_limiter.record(policy, &derived_key).await;
    } else if policy.reset_on_success && status.is_success() {
        state.rate_limiter.clear(policy, &derived_key).await;
    }

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", decision.limit.into());
    headers.insert("x-ratelimit-remaining", decision.remaining.into());
    headers.insert("x-ratelimit-reset", decision.reset_epoch_secs.into());

    response
}

/// The blanket per-IP limit applied in front of everything.
pub async fn rate_limit_global(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_real_ip(&req);
    let policy = state.config.rate_limits.global.clone();
    enforce(&state, &policy, format!("ip:{}", ip), req, next).await
}

/// Limits login/registration attempts per IP. Failures count; a
/// successful login clears the window.
pub async fn rate_limit_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_real_ip(&req);
    let policy = state.config.rate_limits.auth.clone();
    enforce(&state, &policy, format!("ip:{}", ip), req, next).await
}

/// Limits search traffic per IP.
pub async fn rate_limit_search(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_real_ip(&req);
    let policy = state.config.rate_limits.search.clone();
    enforce(&state, &policy, format!("ip:{}", ip), req, next).await
}

/// Limits social actions (ratings, follows) per authenticated principal.
pub async fn rate_limit_social(
    State(state): State<AppState>,
    Extension(session): Extension<SessionRecord>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let policy = state.config.rate_limits.social.clone();
    enforce(
        &state,
        &policy,
        format!("user:{}", session.user_id),
        req,
        next,
    )
    .await
}

/// Limits uploads per authenticated principal; only successful uploads
/// consume quota.
pub async fn rate_limit_upload(
    State(state): State<AppState>,
    Extension(session): Extension<SessionRecord>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let policy = state.config.rate_limits.upload.clone();
    enforce(
        &state,
        &policy,
        format!("user:{}", session.user_id),
        req,
        next,
    )
    .await
}

/// Limits comment posting per authenticated principal.
pub async fn rate_limit_comment(
    State(state): State<AppState>,
    Extension(session): Extension<SessionRecord>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let policy = state.config.rate_limits.comment.clone();
    enforce(
        &state,
        &policy,
        format!("user:{}", session.user_id),
        req,
        next,
    )
    .await
}

/// Limits prompt/pool creation per authenticated principal.
pub async fn rate_limit_creation(
    State(state): State<AppState>,
    Extension(session): Extension<SessionRecord>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let policy = state.config.rate_limits.creation.clone();
    enforce(
        &state,
        &policy,
        format!("user:{}", session.user_id),
        req,
        next,
    )
    .await
}
