use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{Router, body::Body, middleware::from_fn_with_state, routing::get};
use chrono::Utc;
use http::{Request, StatusCode};
use tower::ServiceExt;
use tower_cookies::CookieManagerLayer;
use uuid::Uuid;

use prompthub_ephemeral::config::Config;
use prompthub_ephemeral::kvs::memory::InMemoryKvs;
use prompthub_ephemeral::middleware_layer;
use prompthub_ephemeral::services::one_time_token::TokenPurpose;
use prompthub_ephemeral::services::session::SessionRecord;
use prompthub_ephemeral::state::AppState;

fn degraded_state() -> (AppState, Arc<InMemoryKvs>) {
    let kvs = Arc::new(InMemoryKvs::new());
    let state = AppState::with_kvs(Config::default(), kvs.clone());
    (state, kvs)
}

fn sample_record(user_id: Uuid) -> SessionRecord {
    SessionRecord {
        user_id,
        username: "ada".to_string(),
        email: None,
        role: "member".to_string(),
        remember: false,
        created_at: Utc::now(),
        last_activity: Utc::now(),
        ip_address: None,
        user_agent: None,
    }
}

#[tokio::test]
async fn unreachable_kvs_disables_features_without_failing() {
    let (state, kvs) = degraded_state();

    // Seed a session and a cache entry while the store is healthy.
    let session_id = Uuid::new_v4().to_string();
    state
        .sessions
        .create(&session_id, sample_record(Uuid::new_v4()), false)
        .await
        .unwrap();
    state.cache.set("cache:prompt:1", "v1", None).await;

    kvs.set_available(false);

    // Liveness reflects the outage.
    assert!(!state.kvs_available().await);

    // Rate limiting fails open.
    let policy = &state.config.rate_limits.global;
    for _ in 0..policy.max_requests + 10 {
        assert!(state.rate_limiter.check(policy, "ip:1").await.allowed);
        state.rate_limiter.record(policy, "ip:1").await;
    }

    // Cache reads miss, writes no-op.
    assert_eq!(state.cache.get("cache:prompt:1").await, None);
    state.cache.set("cache:prompt:2", "v2", None).await;

    // Session reads report not-found, forcing re-authentication.
    assert!(state.sessions.get(&session_id).await.is_none());
    assert!(
        state
            .sessions
            .list_for_subject(&Uuid::new_v4())
            .await
            .is_empty()
    );

    // Revocation fails open; presence and one-time tokens read empty.
    assert!(!state.revocations.is_revoked("jti-1").await);
    assert_eq!(state.presence.active_count().await, 0);
    state.presence.touch("user-1").await;
    assert_eq!(
        state.one_time_tokens.consume(TokenPurpose::PasswordReset, "tok").await,
        None
    );

    // Writes that matter surface an error to their caller instead of
    // panicking.
    assert!(
        state
            .sessions
            .create("other", sample_record(Uuid::new_v4()), false)
            .await
            .is_err()
    );
    assert!(
        state
            .one_time_tokens
            .issue(TokenPurpose::PasswordReset, "user-1")
            .await
            .is_err()
    );

    // Recovery: the seeded session survives the outage.
    kvs.set_available(true);
    assert!(state.sessions.get(&session_id).await.is_some());
    assert_eq!(state.cache.get("cache:prompt:1").await.as_deref(), Some("v1"));
}

#[tokio::test]
async fn requests_still_succeed_with_the_kvs_down() {
    let (state, kvs) = degraded_state();
    kvs.set_available(false);

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new()
        .route(
            "/api/prompts",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::cache::cache_semi_dynamic,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_global,
        ))
        .with_state(state.clone())
        .layer(CookieManagerLayer::new());

    // No caching, no rate limiting — every request runs the handler and
    // succeeds.
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/prompts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}
