use std::sync::Arc;

use futures::future::join_all;

use crate::kvs::client::Kvs;

/// The entity kinds whose mutations fan out cache invalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Prompt,
    Pool,
    CommunityCall,
    Comment,
    User,
}

/// Direct key plus the derived-key families that may hold stale copies.
struct InvalidationRule {
    direct: &'static str,
    patterns: &'static [&'static str],
}

/// Mutating an entity must clear its direct key and every family of
/// derived keys (listings, search, feeds, trending) that could embed a
/// copy of it. `{id}` is substituted with the entity id.
static PROMPT_RULE: InvalidationRule = InvalidationRule {
    direct: "cache:prompt:{id}",
    patterns: &[
        "cache:prompts:*",
        "cache:search:prompts:*",
        "cache:trending:*",
        "cache:resp:/api/prompts*",
    ],
};

static POOL_RULE: InvalidationRule = InvalidationRule {
    direct: "cache:pool:{id}",
    patterns: &[
        "cache:pools:*",
        "cache:search:pools:*",
        "cache:trending:*",
        "cache:resp:/api/pools*",
    ],
};

static CALL_RULE: InvalidationRule = InvalidationRule {
    direct: "cache:call:{id}",
    patterns: &["cache:calls:*", "cache:resp:/api/calls*"],
};

static COMMENT_RULE: InvalidationRule = InvalidationRule {
    direct: "cache:comment:{id}",
    patterns: &["cache:comments:*", "cache:resp:/api/prompts*"],
};

static USER_RULE: InvalidationRule = InvalidationRule {
    direct: "cache:user:{id}",
    patterns: &[
        "cache:users:*",
        "cache:search:users:*",
        "cache:resp:/api/users*",
    ],
};

fn rule_for(kind: EntityKind) -> &'static InvalidationRule {
    match kind {
        EntityKind::Prompt => &PROMPT_RULE,
        EntityKind::Pool => &POOL_RULE,
        EntityKind::CommunityCall => &CALL_RULE,
        EntityKind::Comment => &COMMENT_RULE,
        EntityKind::User => &USER_RULE,
    }
}

/// Builds the cache key for a subject's public profile.
pub fn profile_key(user_id: &str) -> String {
    format!("cache:user:{}", user_id)
}

/// Builds the cache key for a prompt by id.
pub fn prompt_key(id: &str) -> String {
    format!("cache:prompt:{}", id)
}

/// Builds the cache key for a pool/challenge by id.
pub fn pool_key(id: &str) -> String {
    format!("cache:pool:{}", id)
}

/// Builds the cache key for a paginated listing.
pub fn listing_key(entity: &str, filter: &str, page: u32) -> String {
    format!("cache:{}:list:{}:{}", entity, filter, page)
}

/// Builds the cache key for a search result page. The query is
/// normalized so trivially different spellings share an entry.
pub fn search_key(scope: &str, query: &str) -> String {
    format!("cache:search:{}:{}", scope, query.trim().to_lowercase())
}

/// Builds the cache key for a trending/aggregate view.
pub fn trending_key(kind: &str) -> String {
    format!("cache:trending:{}", kind)
}

/// Builds the cache key for a whole-response entry. Subject-scoped
/// responses fold the subject id in so one subject can never be served
/// another's body.
pub fn response_key(target: &str, subject: Option<&str>) -> String {
    match subject {
        Some(subject) => format!("cache:resp:{}:u:{}", target, subject),
        None => format!("cache:resp:{}", target),
    }
}

/// Read-through cache over the KVS.
///
/// Values are opaque serialized strings; freshness is the caller's
/// business. Unavailability degrades to always-miss and no-op writes — a
/// cache that is down must never turn a successful request into a failed
/// one.
#[derive(Clone)]
pub struct CacheService {
    kvs: Arc<dyn Kvs>,
    default_ttl_secs: u64,
}

impl CacheService {
    /// Creates a new `CacheService`.
    ///
    /// # Arguments
    ///
    /// * `kvs` - The shared KVS client.
    /// * `default_ttl_secs` - TTL applied when `set` is given none.
    pub fn new(kvs: Arc<dyn Kvs>, default_ttl_secs: u64) -> Self {
        Self {
            kvs,
            default_ttl_secs,
        }
    }

    /// Looks up a cached value. Failures degrade to a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.kvs.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("❌ Cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    /// Stores a value under `key`. Failures degrade to a no-op.
    pub async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) {
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        if let Err(e) = self.kvs.set_ex(key, value, ttl).await {
            tracing::warn!("❌ Cache write failed, skipping: {}", e);
        }
    }

    /// Deletes the given keys. Failures degrade to a no-op.
    pub async fn delete(&self, keys: &[String]) {
        if let Err(e) = self.kvs.del(keys).await {
            tracing::warn!("❌ Cache delete failed: {}", e);
        }
    }

    /// Deletes every key matching a glob pattern.
    ///
    /// KEYS is linear in the keyspace; every pattern used here stays
    /// under the TTL-bounded `cache:` prefix.
    pub async fn delete_by_pattern(&self, pattern: &str) {
        let keys = match self.kvs.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("❌ Cache pattern scan failed for {}: {}", pattern, e);
                return;
            }
        };
        if keys.is_empty() {
            return;
        }
        tracing::debug!("🧹 Invalidating {} keys matching {}", keys.len(), pattern);
        self.delete(&keys).await;
    }

    /// Fans out invalidation for a mutated entity: its direct key plus
    /// every derived-key family from the invalidation table. Called by
    /// mutation handlers after a successful commit, never on failure.
    pub async fn invalidate(&self, kind: EntityKind, id: &str) {
        let rule = rule_for(kind);

        self.delete(&[rule.direct.replace("{id}", id)]).await;

        let expanded: Vec<String> = rule
            .patterns
            .iter()
            .map(|pattern| pattern.replace("{id}", id))
            .collect();
        join_all(
            expanded
                .iter()
                .map(|pattern| self.delete_by_pattern(pattern)),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_builders_namespace_by_entity() {
        assert_eq!(prompt_key("42"), "cache:prompt:42");
        assert_eq!(pool_key("7"), "cache:pool:7");
        assert_eq!(listing_key("prompts", "recent", 2), "cache:prompts:list:recent:2");
        assert_eq!(search_key("prompts", "  GPT Agents "), "cache:search:prompts:gpt agents");
        assert_eq!(trending_key("prompts"), "cache:trending:prompts");
    }

    #[test]
    fn response_key_folds_subject_in_when_scoped() {
        assert_eq!(response_key("/api/prompts?page=1", None), "cache:resp:/api/prompts?page=1");
        assert_eq!(
            response_key("/api/feed", Some("u1")),
            "cache:resp:/api/feed:u:u1"
        );
    }
}
