use std::sync::Arc;

use chrono::Utc;

use crate::kvs::client::Kvs;

/// Which response outcomes count against a policy's ceiling.
///
/// The check itself is read-only; the counter moves only after the
/// response is known, so a policy can e.g. count failed logins without
/// penalizing successful ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountMode {
    /// Every checked request counts.
    Always,
    /// Only 4xx responses count (credential-guessing style limits).
    FailuresOnly,
    /// Only 2xx responses count (consumption style limits).
    SuccessesOnly,
}

/// A named fixed-window rate-limit policy.
///
/// Policies differ only by window, ceiling and counting rules; the
/// algorithm is shared.
#[derive(Clone, Debug)]
pub struct RateLimitPolicy {
    /// Policy name, used as the key namespace segment.
    pub name: &'static str,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Maximum counted requests per window.
    pub max_requests: u64,
    /// Which outcomes move the counter.
    pub count_mode: CountMode,
    /// Whether a 2xx response clears the current window's counter
    /// (used by the auth policy: a successful login forgives prior
    /// failures).
    pub reset_on_success: bool,
}

impl RateLimitPolicy {
    /// Creates a new policy.
    pub fn new(name: &'static str, window_ms: u64, max_requests: u64, count_mode: CountMode) -> Self {
        Self {
            name,
            window_ms,
            max_requests,
            count_mode,
            reset_on_success: false,
        }
    }

    /// Marks the policy as clearing its counter on success.
    pub fn clear_on_success(mut self) -> Self {
        self.reset_on_success = true;
        self
    }
}

/// The outcome of a rate-limit check, carried to the response as quota
/// metadata.
#[derive(Clone, Debug)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The policy ceiling.
    pub limit: u64,
    /// Requests left in the current window, assuming this one counts.
    pub remaining: u64,
    /// Seconds until the current window ends; meaningful when denied.
    pub retry_after_secs: u64,
    /// Epoch second at which the current window resets.
    pub reset_epoch_secs: i64,
}

/// Distributed fixed-window request limiter.
///
/// Counters live in the KVS under
/// `rate_limit:<policy>:<derived-key>:<window_start>` and disappear with
/// window expiry; nothing ever decrements them. Rate limiting is
/// best-effort, not a security boundary: if the KVS cannot be reached the
/// limiter fails open and logs.
#[derive(Clone)]
pub struct RateLimiter {
    kvs: Arc<dyn Kvs>,
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs }
    }

    fn counter_key(policy: &RateLimitPolicy, derived_key: &str, window_start_ms: i64) -> String {
        format!(
            "rate_limit:{}:{}:{}",
            policy.name, derived_key, window_start_ms
        )
    }

    /// Checks the current window's counter without mutating it.
    ///
    /// # Arguments
    ///
    /// * `policy` - The policy to enforce.
    /// * `derived_key` - The per-principal or per-IP key for this request.
    ///
    /// # Returns
    ///
    /// A `RateLimitDecision`; on KVS failure the decision is always
    /// "allowed" with a full window remaining.
    pub async fn check(&self, policy: &RateLimitPolicy, derived_key: &str) -> RateLimitDecision {
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = policy.window_ms as i64;
        let window_start = now_ms / window_ms * window_ms;
        let window_end = window_start + window_ms;
        let reset_epoch_secs = window_end / 1000;

        let key = Self::counter_key(policy, derived_key, window_start);
        let count = match self.kvs.get(&key).await {
            Ok(Some(raw)) => raw.parse::<u64>().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!("❌ Rate limiter unavailable, failing open: {}", e);
                return RateLimitDecision {
                    allowed: true,
                    limit: policy.max_requests,
                    remaining: policy.max_requests,
                    retry_after_secs: 0,
                    reset_epoch_secs,
                };
            }
        };

        if count >= policy.max_requests {
            let retry_after_secs = ((window_end - now_ms).max(0) as u64).div_ceil(1000).max(1);
            return RateLimitDecision {
                allowed: false,
                limit: policy.max_requests,
                remaining: 0,
                retry_after_secs,
                reset_epoch_secs,
            };
        }

        RateLimitDecision {
            allowed: true,
            limit: policy.max_requests,
            remaining: policy.max_requests - count - 1,
            retry_after_secs: 0,
            reset_epoch_secs,
        }
    }

    /// Counts one attempt against the current window.
    ///
    /// Deferred until the response outcome is known; the window's TTL is
    /// set on its first increment only. Failures are logged and dropped —
    /// a missed count is cheaper than a failed request.
    pub async fn record(&self, policy: &RateLimitPolicy, derived_key: &str) {
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = policy.window_ms as i64;
        let window_start = now_ms / window_ms * window_ms;
        let key = Self::counter_key(policy, derived_key, window_start);

        match self.kvs.incr(&key).await {
            Ok(1) => {
                let ttl_secs = policy.window_ms.div_ceil(1000) + 1;
                if let Err(e) = self.kvs.expire(&key, ttl_secs).await {
                    tracing::warn!("❌ Failed to set rate-limit window expiry: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("❌ Failed to count rate-limited request: {}", e);
            }
        }
    }

    /// Drops the current window's counter for the given key.
    ///
    /// Used by `reset_on_success` policies: a successful outcome forgives
    /// the failures accumulated in this window.
    pub async fn clear(&self, policy: &RateLimitPolicy, derived_key: &str) {
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = policy.window_ms as i64;
        let window_start = now_ms / window_ms * window_ms;
        let key = Self::counter_key(policy, derived_key, window_start);

        if let Err(e) = self.kvs.del(&[key]).await {
            tracing::warn!("❌ Failed to clear rate-limit counter: {}", e);
        }
    }
}
