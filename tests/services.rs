use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use uuid::Uuid;

use prompthub_ephemeral::kvs::memory::InMemoryKvs;
use prompthub_ephemeral::services::cache::{
    self, CacheService, EntityKind,
};
use prompthub_ephemeral::services::one_time_token::{OneTimeTokenStore, TokenPurpose};
use prompthub_ephemeral::services::presence::PresenceTracker;
use prompthub_ephemeral::services::rate_limit::{CountMode, RateLimitPolicy, RateLimiter};
use prompthub_ephemeral::services::revocation::TokenRevocationList;
use prompthub_ephemeral::services::session::{SessionRecord, SessionStore, SessionUpdate};

fn kvs() -> Arc<InMemoryKvs> {
    Arc::new(InMemoryKvs::new())
}

fn session_store(kvs: Arc<InMemoryKvs>, ttl_secs: u64) -> SessionStore {
    let presence = PresenceTracker::new(kvs.clone(), 300);
    SessionStore::new(kvs, presence, ttl_secs, 60)
}

fn sample_record(user_id: Uuid) -> SessionRecord {
    SessionRecord {
        user_id,
        username: "ada".to_string(),
        email: Some("ada@example.com".to_string()),
        role: "member".to_string(),
        remember: false,
        created_at: Utc::now(),
        last_activity: Utc::now(),
        ip_address: Some("127.0.0.1".to_string()),
        user_agent: Some("integration-test".to_string()),
    }
}

/// Sleeps past the window boundary if the current fixed window is about
/// to roll over, so a test's requests all land in one window.
async fn align_window(window_ms: u64) {
    let now = Utc::now().timestamp_millis() as u64;
    let elapsed = now % window_ms;
    if window_ms - elapsed < 1000 {
        sleep(Duration::from_millis(window_ms - elapsed + 20)).await;
    }
}

// --- rate limiting ---

#[tokio::test]
async fn sixth_request_in_same_window_is_denied() {
    let limiter = RateLimiter::new(kvs());
    let policy = RateLimitPolicy::new("test", 60_000, 5, CountMode::Always);
    align_window(60_000).await;

    for attempt in 0..5 {
        let decision = limiter.check(&policy, "ip:203.0.113.9").await;
        assert!(decision.allowed, "attempt {} should be allowed", attempt + 1);
        limiter.record(&policy, "ip:203.0.113.9").await;
    }

    let denied = limiter.check(&policy, "ip:203.0.113.9").await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert!(denied.retry_after_secs > 0);
    assert!(denied.reset_epoch_secs >= Utc::now().timestamp());
}

#[tokio::test]
async fn first_request_of_next_window_is_allowed() {
    let limiter = RateLimiter::new(kvs());
    let policy = RateLimitPolicy::new("burst", 1000, 2, CountMode::Always);
    align_window(1000).await;

    limiter.record(&policy, "ip:1").await;
    limiter.record(&policy, "ip:1").await;
    assert!(!limiter.check(&policy, "ip:1").await.allowed);

    // Cross into the next window.
    let now = Utc::now().timestamp_millis() as u64;
    sleep(Duration::from_millis(1000 - now % 1000 + 50)).await;

    assert!(limiter.check(&policy, "ip:1").await.allowed);
}

#[tokio::test]
async fn counters_are_independent_per_key_and_policy() {
    let limiter = RateLimiter::new(kvs());
    let policy = RateLimitPolicy::new("comment", 60_000, 1, CountMode::SuccessesOnly);
    align_window(60_000).await;

    limiter.record(&policy, "user:a").await;
    assert!(!limiter.check(&policy, "user:a").await.allowed);
    assert!(limiter.check(&policy, "user:b").await.allowed);

    let other = RateLimitPolicy::new("social", 60_000, 1, CountMode::Always);
    assert!(limiter.check(&other, "user:a").await.allowed);
}

#[tokio::test]
async fn clearing_a_window_forgives_prior_failures() {
    let limiter = RateLimiter::new(kvs());
    let policy =
        RateLimitPolicy::new("auth", 60_000, 2, CountMode::FailuresOnly).clear_on_success();
    align_window(60_000).await;

    limiter.record(&policy, "ip:9").await;
    limiter.record(&policy, "ip:9").await;
    assert!(!limiter.check(&policy, "ip:9").await.allowed);

    limiter.clear(&policy, "ip:9").await;
    assert!(limiter.check(&policy, "ip:9").await.allowed);
}

// --- sessions ---

#[tokio::test]
async fn reads_slide_session_expiry() {
    let store = session_store(kvs(), 1);
    let id = Uuid::new_v4().to_string();
    store
        .create(&id, sample_record(Uuid::new_v4()), false)
        .await
        .unwrap();

    // Each read lands inside the 1s TTL but the total span exceeds it,
    // so only the sliding refresh keeps the session alive.
    for _ in 0..3 {
        sleep(Duration::from_millis(600)).await;
        assert!(store.get(&id).await.is_some());
    }

    sleep(Duration::from_millis(1500)).await;
    assert!(store.get(&id).await.is_none());
}

#[tokio::test]
async fn get_bumps_last_activity() {
    let store = session_store(kvs(), 60);
    let id = Uuid::new_v4().to_string();
    let record = sample_record(Uuid::new_v4());
    let created_at = record.last_activity;
    store.create(&id, record, false).await.unwrap();

    sleep(Duration::from_millis(50)).await;
    let read = store.get(&id).await.unwrap();
    assert!(read.last_activity > created_at);
}

#[tokio::test]
async fn update_merges_display_attributes() {
    let store = session_store(kvs(), 60);
    let id = Uuid::new_v4().to_string();
    store
        .create(&id, sample_record(Uuid::new_v4()), false)
        .await
        .unwrap();

    let updated = store
        .update(
            &id,
            SessionUpdate {
                role: Some("moderator".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(updated);

    let read = store.get(&id).await.unwrap();
    assert_eq!(read.role, "moderator");
    assert_eq!(read.username, "ada");

    assert!(
        !store
            .update(&Uuid::new_v4().to_string(), SessionUpdate::default())
            .await
    );
}

#[tokio::test]
async fn logout_everywhere_removes_every_session() {
    let store = session_store(kvs(), 60);
    let user_id = Uuid::new_v4();
    let ids: Vec<String> = (0..3).map(|_| Uuid::new_v4().to_string()).collect();
    for id in &ids {
        store
            .create(id, sample_record(user_id), false)
            .await
            .unwrap();
    }

    assert_eq!(store.list_for_subject(&user_id).await.len(), 3);

    let removed = store.delete_all_for_subject(&user_id).await;
    assert_eq!(removed, 3);

    for id in &ids {
        assert!(store.get(id).await.is_none());
    }
    assert!(store.list_for_subject(&user_id).await.is_empty());
}

#[tokio::test]
async fn listing_prunes_stale_index_members() {
    let shared = kvs();
    let store = session_store(shared.clone(), 60);
    let user_id = Uuid::new_v4();
    let keep = Uuid::new_v4().to_string();
    let gone = Uuid::new_v4().to_string();
    store
        .create(&keep, sample_record(user_id), false)
        .await
        .unwrap();
    store
        .create(&gone, sample_record(user_id), false)
        .await
        .unwrap();

    // Simulate TTL expiry of one record while its index entry lags.
    use prompthub_ephemeral::kvs::client::Kvs;
    shared
        .del(&[format!("session:{}", gone)])
        .await
        .unwrap();

    let live = store.list_for_subject(&user_id).await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].0, keep);
}

#[tokio::test]
async fn deleted_session_reads_as_not_found() {
    let store = session_store(kvs(), 60);
    let id = Uuid::new_v4().to_string();
    let user_id = Uuid::new_v4();
    store.create(&id, sample_record(user_id), false).await.unwrap();

    store.delete(&id).await;
    assert!(store.get(&id).await.is_none());
    assert!(store.list_for_subject(&user_id).await.is_empty());
}

// --- token revocation ---

#[tokio::test]
async fn revocation_lasts_until_token_expiry() {
    let list = TokenRevocationList::new(kvs());
    let expiry = Utc::now().timestamp() + 2;
    list.revoke("jti-1", "user-1", expiry, Some("logout".to_string()))
        .await
        .unwrap();

    assert!(list.is_revoked("jti-1").await);
    assert!(
        list.revoked_for_subject("user-1")
            .await
            .contains(&"jti-1".to_string())
    );

    sleep(Duration::from_millis(2400)).await;
    assert!(!list.is_revoked("jti-1").await);
}

#[tokio::test]
async fn revoking_an_expired_token_is_a_noop() {
    let list = TokenRevocationList::new(kvs());
    let expiry = Utc::now().timestamp() - 10;
    list.revoke("jti-old", "user-1", expiry, None).await.unwrap();

    assert!(!list.is_revoked("jti-old").await);
    assert!(list.revoked_for_subject("user-1").await.is_empty());
}

// --- presence ---

#[tokio::test]
async fn presence_counts_then_prunes() {
    let tracker = PresenceTracker::new(kvs(), 1);

    tracker.touch("user-a").await;
    tracker.touch("user-b").await;
    assert_eq!(tracker.active_count().await, 2);

    // Re-touching is an upsert, not a second entry.
    tracker.touch("user-a").await;
    assert_eq!(tracker.active_count().await, 2);

    sleep(Duration::from_millis(1300)).await;
    assert_eq!(tracker.active_count().await, 0);
}

// --- one-time tokens ---

#[tokio::test]
async fn one_time_token_is_single_use() {
    let store = OneTimeTokenStore::new(kvs(), 900, 86400);
    let token = store
        .issue(TokenPurpose::PasswordReset, "user-7")
        .await
        .unwrap();

    assert_eq!(
        store.consume(TokenPurpose::PasswordReset, &token).await,
        Some("user-7".to_string())
    );
    assert_eq!(store.consume(TokenPurpose::PasswordReset, &token).await, None);
}

#[tokio::test]
async fn purposes_do_not_cross() {
    let store = OneTimeTokenStore::new(kvs(), 900, 86400);
    let token = store
        .issue(TokenPurpose::PasswordReset, "user-7")
        .await
        .unwrap();

    assert_eq!(store.consume(TokenPurpose::EmailVerification, &token).await, None);
    assert_eq!(
        store.consume(TokenPurpose::PasswordReset, &token).await,
        Some("user-7".to_string())
    );
}

#[tokio::test]
async fn one_time_token_expires() {
    let store = OneTimeTokenStore::new(kvs(), 1, 1);
    let token = store
        .issue(TokenPurpose::EmailVerification, "user-8")
        .await
        .unwrap();

    sleep(Duration::from_millis(1300)).await;
    assert_eq!(store.consume(TokenPurpose::EmailVerification, &token).await, None);
}

#[tokio::test]
async fn racing_consumers_get_at_most_one_subject() {
    let store = OneTimeTokenStore::new(kvs(), 900, 86400);
    let token = store
        .issue(TokenPurpose::PasswordReset, "user-9")
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        store.consume(TokenPurpose::PasswordReset, &token),
        store.consume(TokenPurpose::PasswordReset, &token)
    );

    let winners = [a, b].into_iter().flatten().count();
    assert_eq!(winners, 1);
}

// --- cache ---

#[tokio::test]
async fn invalidation_fans_out_to_derived_keys() {
    let service = CacheService::new(kvs(), 300);

    let direct = cache::prompt_key("42");
    let listing = cache::listing_key("prompts", "recent", 1);
    let search = cache::search_key("prompts", "agents");
    let trending = cache::trending_key("prompts");
    let unrelated = cache::pool_key("7");

    for key in [&direct, &listing, &search, &trending, &unrelated] {
        service.set(key, "v1", None).await;
        assert_eq!(service.get(key).await.as_deref(), Some("v1"));
    }

    service.invalidate(EntityKind::Prompt, "42").await;

    assert_eq!(service.get(&direct).await, None);
    assert_eq!(service.get(&listing).await, None);
    assert_eq!(service.get(&search).await, None);
    assert_eq!(service.get(&trending).await, None);
    assert_eq!(service.get(&unrelated).await.as_deref(), Some("v1"));
}

#[tokio::test]
async fn cache_entries_respect_ttl() {
    let service = CacheService::new(kvs(), 300);
    service.set("cache:prompt:ttl", "v1", Some(1)).await;
    assert_eq!(service.get("cache:prompt:ttl").await.as_deref(), Some("v1"));

    sleep(Duration::from_millis(1300)).await;
    assert_eq!(service.get("cache:prompt:ttl").await, None);
}

#[tokio::test]
async fn mutated_entity_is_not_served_stale() {
    let service = CacheService::new(kvs(), 300);
    let key = cache::prompt_key("99");

    service.set(&key, "v1", None).await;
    assert_eq!(service.get(&key).await.as_deref(), Some("v1"));

    // A mutation handler invalidates on success; the next read misses
    // and recomputes from the system of record.
    service.invalidate(EntityKind::Prompt, "99").await;
    assert_eq!(service.get(&key).await, None);

    service.set(&key, "v2", None).await;
    assert_eq!(service.get(&key).await.as_deref(), Some("v2"));
}
