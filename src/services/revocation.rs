use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::kvs::client::Kvs;

/// The payload stored for a revoked token id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedEntry {
    /// The subject the token was issued to.
    pub subject: String,
    /// The token's original expiry, epoch seconds.
    pub expires_at: i64,
    /// When the revocation happened, epoch seconds.
    pub revoked_at: i64,
    /// Optional operator-facing reason (logout, compromise).
    pub reason: Option<String>,
}

/// Denylist of token identifiers, bounded by token lifetime.
///
/// An entry only needs to exist until the token it blocks would have
/// expired anyway, so the TTL is exactly `expiry − now` and nothing is
/// ever renewed.
#[derive(Clone)]
pub struct TokenRevocationList {
    kvs: Arc<dyn Kvs>,
}

fn entry_key(jti: &str) -> String {
    format!("revoked_token:{}", jti)
}

fn subject_key(subject: &str) -> String {
    format!("revoked_user_tokens:{}", subject)
}

impl TokenRevocationList {
    /// Creates a new `TokenRevocationList`.
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs }
    }

    /// Revokes a token id until its natural expiry.
    ///
    /// A token that has already expired is a no-op: it is unusable by
    /// virtue of having expired, so storing it would only waste space.
    /// The jti is also added to the subject's revoked set (expiring on
    /// the same schedule) so all revocations for a subject can be
    /// enumerated.
    ///
    /// # Arguments
    ///
    /// * `jti` - The token identifier.
    /// * `subject` - The subject the token was issued to.
    /// * `expiry_epoch_secs` - The token's original expiry.
    /// * `reason` - Optional reason recorded with the entry.
    pub async fn revoke(
        &self,
        jti: &str,
        subject: &str,
        expiry_epoch_secs: i64,
        reason: Option<String>,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let ttl = expiry_epoch_secs - now;
        if ttl <= 0 {
            tracing::debug!("Token {} already expired, nothing to revoke", jti);
            return Ok(());
        }
        let ttl = ttl as u64;

        let entry = RevokedEntry {
            subject: subject.to_string(),
            expires_at: expiry_epoch_secs,
            revoked_at: now,
            reason,
        };
        let payload = sonic_rs::to_string(&entry)
            .map_err(|e| AppError::Serialization(format!("revocation encode failed: {}", e)))?;

        self.kvs.set_ex(&entry_key(jti), &payload, ttl).await?;

        let set_key = subject_key(subject);
        if let Err(e) = self.kvs.sadd(&set_key, jti).await {
            tracing::warn!("⚠️ Failed to index revocation for {}: {}", subject, e);
        } else if let Err(e) = self.kvs.expire(&set_key, ttl).await {
            tracing::warn!("⚠️ Failed to set revoked-set TTL: {}", e);
        }

        tracing::info!("✅ Token {} revoked for subject {}", jti, subject);
        Ok(())
    }

    /// Whether the token id is on the denylist.
    ///
    /// This is a pure existence check and must run on every token
    /// verification path in addition to signature and expiry checks. A
    /// KVS failure reads as "not revoked": the denylist is an early-exit
    /// layer, and tokens still die at their signed expiry.
    pub async fn is_revoked(&self, jti: &str) -> bool {
        match self.kvs.exists(&entry_key(jti)).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("❌ Revocation check unavailable, failing open: {}", e);
                false
            }
        }
    }

    /// Enumerates the still-live revocations recorded for a subject.
    pub async fn revoked_for_subject(&self, subject: &str) -> Vec<String> {
        self.kvs
            .smembers(&subject_key(subject))
            .await
            .unwrap_or_default()
    }
}
