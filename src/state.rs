use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::kvs::client::{Kvs, RedisKvs};
use crate::services::cache::CacheService;
use crate::services::one_time_token::OneTimeTokenStore;
use crate::services::presence::PresenceTracker;
use crate::services::rate_limit::RateLimiter;
use crate::services::revocation::TokenRevocationList;
use crate::services::session::SessionStore;

/// The application's state.
///
/// One shared KVS client, and one instance of each ephemeral service
/// built on it. Constructed once at process start and cloned into every
/// handler and middleware; there is no other global state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// The shared KVS client.
    pub kvs: Arc<dyn Kvs>,
    /// Fixed-window request limiter.
    pub rate_limiter: RateLimiter,
    /// Server-side session lifecycle.
    pub sessions: SessionStore,
    /// Token-id denylist.
    pub revocations: TokenRevocationList,
    /// Recently-active principal tracking.
    pub presence: PresenceTracker,
    /// Single-use reset/verification tokens.
    pub one_time_tokens: OneTimeTokenStore,
    /// Read-through response/entity cache.
    pub cache: CacheService,
}

impl AppState {
    /// Creates a new `AppState` backed by Redis.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let conn = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        let kvs: Arc<dyn Kvs> = Arc::new(RedisKvs::new(
            conn,
            Duration::from_millis(config.kvs_op_timeout_ms),
        ));

        Ok(Self::with_kvs(config.clone(), kvs))
    }

    /// Creates an `AppState` over an injected KVS client.
    ///
    /// This is the seam tests and Redis-less development use: any `Kvs`
    /// implementation (for example `kvs::memory::InMemoryKvs`) can stand
    /// in for the shared store.
    pub fn with_kvs(config: Config, kvs: Arc<dyn Kvs>) -> Self {
        let presence = PresenceTracker::new(kvs.clone(), config.presence_window_secs);
        let sessions = SessionStore::new(
            kvs.clone(),
            presence.clone(),
            config.session_ttl_secs,
            config.session_remember_ttl_secs,
        );
        let rate_limiter = RateLimiter::new(kvs.clone());
        let revocations = TokenRevocationList::new(kvs.clone());
        let one_time_tokens = OneTimeTokenStore::new(
            kvs.clone(),
            config.reset_token_ttl_secs,
            config.verify_token_ttl_secs,
        );
        let cache = CacheService::new(kvs.clone(), config.cache_ttls.medium);

        tracing::info!("✅ Ephemeral state services initialized");

        AppState {
            config,
            kvs,
            rate_limiter,
            sessions,
            revocations,
            presence,
            one_time_tokens,
            cache,
        }
    }

    /// Liveness check against the shared store, for health endpoints.
    pub async fn kvs_available(&self) -> bool {
        self.kvs.ping().await.is_ok()
    }
}
