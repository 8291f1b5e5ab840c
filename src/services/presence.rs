use std::sync::Arc;

use chrono::Utc;

use crate::kvs::client::Kvs;

/// The single sorted set holding (subject, last-seen-millis) pairs.
const PRESENCE_KEY: &str = "presence:active";

/// Tracks which subjects were active within a trailing window.
///
/// Every write prunes entries older than the window, so maintenance is
/// amortized across normal traffic and no background sweeper exists.
/// Entries may linger up to one write past the window; the count is a
/// display statistic, not an invariant.
#[derive(Clone)]
pub struct PresenceTracker {
    kvs: Arc<dyn Kvs>,
    window_secs: u64,
}

impl PresenceTracker {
    /// Creates a new `PresenceTracker`.
    pub fn new(kvs: Arc<dyn Kvs>, window_secs: u64) -> Self {
        Self { kvs, window_secs }
    }

    fn cutoff_ms(&self) -> f64 {
        (Utc::now().timestamp_millis() - (self.window_secs as i64) * 1000) as f64
    }

    /// Upserts the subject's last-seen score to now and prunes entries
    /// that fell out of the window. Failures degrade to a no-op.
    pub async fn touch(&self, subject: &str) {
        let now_ms = Utc::now().timestamp_millis() as f64;
        if let Err(e) = self.kvs.zadd(PRESENCE_KEY, subject, now_ms).await {
            tracing::warn!("❌ Presence touch failed: {}", e);
            return;
        }
        let _ = self
            .kvs
            .zremrangebyscore(PRESENCE_KEY, f64::NEG_INFINITY, self.cutoff_ms())
            .await;
    }

    /// Returns how many subjects were active within the window.
    /// Failures degrade to 0.
    pub async fn active_count(&self) -> u64 {
        if let Err(e) = self
            .kvs
            .zremrangebyscore(PRESENCE_KEY, f64::NEG_INFINITY, self.cutoff_ms())
            .await
        {
            tracing::warn!("❌ Presence prune failed: {}", e);
            return 0;
        }
        self.kvs.zcard(PRESENCE_KEY).await.unwrap_or(0)
    }
}
