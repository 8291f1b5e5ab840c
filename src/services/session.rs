use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::kvs::client::Kvs;
use crate::services::presence::PresenceTracker;

/// A server-side session record.
///
/// Everything here can be rebuilt by logging in again; the KVS copy is the
/// only copy. The `remember` flag is stored so the sliding refresh keeps
/// re-applying the duration class the session was created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The ID of the user this session belongs to.
    pub user_id: Uuid,
    /// Display name shown in the UI shell.
    pub username: String,
    /// Contact address, if the account has one.
    pub email: Option<String>,
    /// The user's role (member, moderator, admin).
    pub role: String,
    /// Whether this is a long-lived "remember me" session.
    pub remember: bool,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp of the last successful read of this session.
    pub last_activity: DateTime<Utc>,
    /// Origin address captured at login.
    pub ip_address: Option<String>,
    /// Agent string captured at login.
    pub user_agent: Option<String>,
}

/// A partial update applied to a stored session's display attributes.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
}

/// Server-side session lifecycle over the KVS.
///
/// Each session lives under `session:<id>` with a sliding TTL, and every
/// subject keeps an index set of its session ids under
/// `user_sessions:<subject>` so "log out everywhere" can enumerate them.
/// The index is a soft structure: a stale member simply misses on its next
/// read and gets pruned.
#[derive(Clone)]
pub struct SessionStore {
    kvs: Arc<dyn Kvs>,
    presence: PresenceTracker,
    ttl_secs: u64,
    remember_ttl_secs: u64,
}

fn session_key(id: &str) -> String {
    format!("session:{}", id)
}

fn index_key(subject: &Uuid) -> String {
    format!("user_sessions:{}", subject)
}

impl SessionStore {
    /// Creates a new `SessionStore`.
    ///
    /// # Arguments
    ///
    /// * `kvs` - The shared KVS client.
    /// * `presence` - The presence tracker bumped on session activity.
    /// * `ttl_secs` - Duration of a normal session.
    /// * `remember_ttl_secs` - Duration of a "remember me" session.
    pub fn new(
        kvs: Arc<dyn Kvs>,
        presence: PresenceTracker,
        ttl_secs: u64,
        remember_ttl_secs: u64,
    ) -> Self {
        Self {
            kvs,
            presence,
            ttl_secs,
            remember_ttl_secs,
        }
    }

    fn ttl_for(&self, remember: bool) -> u64 {
        if remember {
            self.remember_ttl_secs
        } else {
            self.ttl_secs
        }
    }

    /// Reads a record without refreshing its TTL. Corrupt records are
    /// deleted and reported as absent; KVS failures read as absent.
    async fn read(&self, id: &str) -> Option<SessionRecord> {
        let key = session_key(id);
        match self.kvs.get(&key).await {
            Ok(Some(raw)) => match sonic_rs::from_str::<SessionRecord>(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("⚠️ Corrupt session record {}, deleting: {}", key, e);
                    let _ = self.kvs.del(&[key]).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("❌ Session read failed, treating as not found: {}", e);
                None
            }
        }
    }

    async fn write(&self, id: &str, record: &SessionRecord) -> Result<()> {
        let payload = sonic_rs::to_string(record)
            .map_err(|e| AppError::Serialization(format!("session encode failed: {}", e)))?;
        self.kvs
            .set_ex(&session_key(id), &payload, self.ttl_for(record.remember))
            .await
    }

    /// Creates a session.
    ///
    /// Writes the record with the duration class picked by `remember`,
    /// adds the id to the subject's index (extending the index TTL to
    /// match) and records presence for the subject.
    ///
    /// # Arguments
    ///
    /// * `id` - Opaque, unguessable session id chosen by the caller.
    /// * `record` - The session payload.
    /// * `remember` - Whether to use the long "remember me" duration.
    pub async fn create(&self, id: &str, mut record: SessionRecord, remember: bool) -> Result<()> {
        record.remember = remember;
        let ttl = self.ttl_for(remember);
        self.write(id, &record).await?;

        let index = index_key(&record.user_id);
        if let Err(e) = self.kvs.sadd(&index, id).await {
            tracing::warn!("⚠️ Failed to index session for {}: {}", record.user_id, e);
        } else if let Err(e) = self.kvs.expire(&index, ttl).await {
            tracing::warn!("⚠️ Failed to extend session index TTL: {}", e);
        }

        self.presence.touch(&record.user_id.to_string()).await;
        tracing::debug!("✅ Session created for user {}", record.user_id);
        Ok(())
    }

    /// Looks up a session and slides its expiry.
    ///
    /// On hit the record's `last_activity` is bumped, the record is
    /// rewritten with a fresh TTL and presence is refreshed. A miss means
    /// "not authenticated," never an error: an unreachable KVS degrades to
    /// forced re-authentication.
    pub async fn get(&self, id: &str) -> Option<SessionRecord> {
        let mut record = self.read(id).await?;
        record.last_activity = Utc::now();

        // Last-writer-wins: concurrent refreshes rewrite the same payload
        // apart from the timestamp.
        if let Err(e) = self.write(id, &record).await {
            tracing::warn!("⚠️ Failed to refresh session TTL: {}", e);
        }

        self.presence.touch(&record.user_id.to_string()).await;
        Some(record)
    }

    /// Applies a partial update to a session's display attributes,
    /// rewriting the record with a fresh TTL.
    ///
    /// # Returns
    ///
    /// `true` if the session existed and was rewritten.
    pub async fn update(&self, id: &str, update: SessionUpdate) -> bool {
        let Some(mut record) = self.read(id).await else {
            return false;
        };

        if let Some(username) = update.username {
            record.username = username;
        }
        if let Some(email) = update.email {
            record.email = Some(email);
        }
        if let Some(role) = update.role {
            record.role = role;
        }
        record.last_activity = Utc::now();

        match self.write(id, &record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("❌ Session update failed: {}", e);
                false
            }
        }
    }

    /// Deletes a session and drops it from its subject's index.
    ///
    /// Best-effort: a stale id left in the index self-heals by missing on
    /// its next read.
    pub async fn delete(&self, id: &str) {
        let subject = self.read(id).await.map(|record| record.user_id);

        if let Err(e) = self.kvs.del(&[session_key(id)]).await {
            tracing::warn!("❌ Session delete failed: {}", e);
        }

        if let Some(subject) = subject {
            if let Err(e) = self.kvs.srem(&index_key(&subject), id).await {
                tracing::warn!("⚠️ Failed to unindex session for {}: {}", subject, e);
            }
        }
    }

    /// Deletes every session belonging to a subject, then the index
    /// itself — "log out everywhere."
    ///
    /// # Returns
    ///
    /// How many session records were removed.
    pub async fn delete_all_for_subject(&self, subject: &Uuid) -> u64 {
        let index = index_key(subject);
        let ids = match self.kvs.smembers(&index).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("❌ Failed to enumerate sessions for {}: {}", subject, e);
                return 0;
            }
        };

        let mut keys: Vec<String> = ids.iter().map(|id| session_key(id)).collect();
        keys.push(index);

        match self.kvs.del(&keys).await {
            Ok(removed) => {
                tracing::info!("✅ Logged out {} everywhere ({} sessions)", subject, ids.len());
                removed.saturating_sub(1)
            }
            Err(e) => {
                tracing::warn!("❌ Failed to delete sessions for {}: {}", subject, e);
                0
            }
        }
    }

    /// Lists a subject's live sessions, pruning index entries whose
    /// record no longer resolves.
    pub async fn list_for_subject(&self, subject: &Uuid) -> Vec<(String, SessionRecord)> {
        let index = index_key(subject);
        let ids = match self.kvs.smembers(&index).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("❌ Failed to enumerate sessions for {}: {}", subject, e);
                return Vec::new();
            }
        };

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read(&id).await {
                Some(record) => sessions.push((id, record)),
                None => {
                    let _ = self.kvs.srem(&index, &id).await;
                }
            }
        }
        sessions
    }
}
