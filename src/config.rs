use std::env;
use anyhow::{Context, Result};

use crate::services::rate_limit::{CountMode, RateLimitPolicy};

/// Default item durations, one per data class, in seconds.
#[derive(Clone, Debug)]
pub struct CacheTtls {
    /// Highly volatile data (search results).
    pub short: u64,
    /// Semi-dynamic data (listings, feeds).
    pub medium: u64,
    /// Near-static data (public profiles, published prompts).
    pub long: u64,
    /// Aggregate views (trending).
    pub very_long: u64,
    /// Data that effectively never changes between deploys.
    pub week: u64,
}

/// The named rate-limit policies, one per guarded action class.
#[derive(Clone, Debug)]
pub struct RateLimitSettings {
    pub global: RateLimitPolicy,
    pub auth: RateLimitPolicy,
    pub social: RateLimitPolicy,
    pub upload: RateLimitPolicy,
    pub search: RateLimitPolicy,
    pub comment: RateLimitPolicy,
    pub creation: RateLimitPolicy,
}

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The URL of the Redis server.
    pub redis_url: String,
    /// Bounded timeout applied to every single KVS operation, in millis.
    pub kvs_op_timeout_ms: u64,
    /// Default cache durations per data class.
    pub cache_ttls: CacheTtls,
    /// The duration of a normal session, in seconds.
    pub session_ttl_secs: u64,
    /// The duration of a "remember me" session, in seconds.
    pub session_remember_ttl_secs: u64,
    /// The trailing window within which a subject counts as active.
    pub presence_window_secs: u64,
    /// TTL for password-reset tokens, in seconds.
    pub reset_token_ttl_secs: u64,
    /// TTL for email-verification tokens, in seconds.
    pub verify_token_ttl_secs: u64,
    /// Per-policy rate-limit windows and ceilings.
    pub rate_limits: RateLimitSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            kvs_op_timeout_ms: 500,
            cache_ttls: CacheTtls {
                short: 60,
                medium: 300,
                long: 3600,
                very_long: 21600,
                week: 604800,
            },
            session_ttl_secs: 86400,
            session_remember_ttl_secs: 2_592_000,
            presence_window_secs: 300,
            reset_token_ttl_secs: 900,
            verify_token_ttl_secs: 86400,
            rate_limits: RateLimitSettings {
                global: RateLimitPolicy::new("global", 60_000, 300, CountMode::Always),
                auth: RateLimitPolicy::new("auth", 900_000, 10, CountMode::FailuresOnly)
                    .clear_on_success(),
                social: RateLimitPolicy::new("social", 60_000, 60, CountMode::Always),
                upload: RateLimitPolicy::new("upload", 3_600_000, 20, CountMode::SuccessesOnly),
                search: RateLimitPolicy::new("search", 60_000, 30, CountMode::Always),
                comment: RateLimitPolicy::new("comment", 60_000, 10, CountMode::SuccessesOnly),
                creation: RateLimitPolicy::new("creation", 3_600_000, 30, CountMode::SuccessesOnly),
            },
        }
    }
}

/// Reads a `u64` environment variable, falling back to a default.
fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

/// Applies `RATE_LIMIT_<NAME>_WINDOW_SECS` / `RATE_LIMIT_<NAME>_MAX`
/// overrides to one policy.
fn policy_from_env(mut policy: RateLimitPolicy) -> Result<RateLimitPolicy> {
    let upper = policy.name.to_uppercase();
    let window_secs = env_u64(
        &format!("RATE_LIMIT_{}_WINDOW_SECS", upper),
        policy.window_ms / 1000,
    )?;
    policy.window_ms = window_secs * 1000;
    policy.max_requests = env_u64(&format!("RATE_LIMIT_{}_MAX", upper), policy.max_requests)?;
    Ok(policy)
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// Every variable has a default, so an empty environment yields a
    /// working local configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        Ok(Self {
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            kvs_op_timeout_ms: env_u64("KVS_OP_TIMEOUT_MS", defaults.kvs_op_timeout_ms)?,
            cache_ttls: CacheTtls {
                short: env_u64("CACHE_TTL_SHORT", defaults.cache_ttls.short)?,
                medium: env_u64("CACHE_TTL_MEDIUM", defaults.cache_ttls.medium)?,
                long: env_u64("CACHE_TTL_LONG", defaults.cache_ttls.long)?,
                very_long: env_u64("CACHE_TTL_VERY_LONG", defaults.cache_ttls.very_long)?,
                week: env_u64("CACHE_TTL_WEEK", defaults.cache_ttls.week)?,
            },
            session_ttl_secs: env_u64("SESSION_TTL_SECS", defaults.session_ttl_secs)?,
            session_remember_ttl_secs: env_u64(
                "SESSION_REMEMBER_TTL_SECS",
                defaults.session_remember_ttl_secs,
            )?,
            presence_window_secs: env_u64("PRESENCE_WINDOW_SECS", defaults.presence_window_secs)?,
            reset_token_ttl_secs: env_u64("RESET_TOKEN_TTL_SECS", defaults.reset_token_ttl_secs)?,
            verify_token_ttl_secs: env_u64(
                "VERIFY_TOKEN_TTL_SECS",
                defaults.verify_token_ttl_secs,
            )?,
            rate_limits: RateLimitSettings {
                global: policy_from_env(defaults.rate_limits.global)?,
                auth: policy_from_env(defaults.rate_limits.auth)?,
                social: policy_from_env(defaults.rate_limits.social)?,
                upload: policy_from_env(defaults.rate_limits.upload)?,
                search: policy_from_env(defaults.rate_limits.search)?,
                comment: policy_from_env(defaults.rate_limits.comment)?,
                creation: policy_from_env(defaults.rate_limits.creation)?,
            },
        })
    }
}
