use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::kvs::client::Kvs;

/// A stored value, mirroring the store types the services use.
enum Value {
    Text(String),
    Set(HashSet<String>),
    SortedSet(HashMap<String, f64>),
}

struct Stored {
    value: Value,
    expires_at: Option<Instant>,
}

impl Stored {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// An in-process `Kvs` implementation.
///
/// Backs local development and the test suite without a running Redis.
/// Expiry is enforced lazily on access, single-key operations are atomic
/// under one mutex, and `set_available(false)` simulates a store outage so
/// degradation paths can be rehearsed.
pub struct InMemoryKvs {
    entries: Mutex<HashMap<String, Stored>>,
    available: AtomicBool,
}

impl InMemoryKvs {
    /// Creates a new, empty `InMemoryKvs`.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggles simulated availability. While unavailable every operation
    /// fails, which callers must treat as "feature disabled."
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::KvsUnavailable("simulated outage".to_string()))
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Stored>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for InMemoryKvs {
    fn default() -> Self {
        Self::new()
    }
}

/// Matches a Redis-style glob pattern (only `*` wildcards) against a key.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == candidate;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0usize;

    let first = parts[0];
    if !candidate.starts_with(first) {
        return false;
    }
    pos += first.len();

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match candidate[pos..].find(part) {
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }

    let last = parts[parts.len() - 1];
    if last.is_empty() {
        return true;
    }
    candidate.len() >= pos + last.len() && candidate.ends_with(last)
}

/// Removes the entry if its TTL has elapsed, then returns whether a live
/// entry remains.
fn purge_expired(entries: &mut HashMap<String, Stored>, key: &str) -> bool {
    if entries.get(key).is_some_and(Stored::is_expired) {
        entries.remove(key);
    }
    entries.contains_key(key)
}

#[async_trait]
impl Kvs for InMemoryKvs {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut entries = self.lock();
        if !purge_expired(&mut entries, key) {
            return Ok(None);
        }
        match &entries[key].value {
            Value::Text(text) => Ok(Some(text.clone())),
            _ => Err(AppError::Internal("WRONGTYPE".to_string())),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.check_available()?;
        self.lock().insert(
            key.to_string(),
            Stored {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check_available()?;
        let mut entries = self.lock();
        let mut removed = 0;
        for key in keys {
            if purge_expired(&mut entries, key) && entries.remove(key.as_str()).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let mut entries = self.lock();
        Ok(purge_expired(&mut entries, key))
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.check_available()?;
        let mut entries = self.lock();
        purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Stored {
            value: Value::Text("0".to_string()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Text(text) => {
                let current: i64 = text
                    .parse()
                    .map_err(|_| AppError::Internal("value is not an integer".to_string()))?;
                let next = current + 1;
                *text = next.to_string();
                Ok(next)
            }
            _ => Err(AppError::Internal("WRONGTYPE".to_string())),
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.check_available()?;
        let mut entries = self.lock();
        if !purge_expired(&mut entries, key) {
            return Ok(false);
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(true)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let mut entries = self.lock();
        entries.retain(|_, stored| !stored.is_expired());
        Ok(entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.check_available()?;
        let mut entries = self.lock();
        purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Stored {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            _ => Err(AppError::Internal("WRONGTYPE".to_string())),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.check_available()?;
        let mut entries = self.lock();
        if !purge_expired(&mut entries, key) {
            return Ok(());
        }
        if let Some(entry) = entries.get_mut(key) {
            match &mut entry.value {
                Value::Set(set) => {
                    set.remove(member);
                }
                _ => return Err(AppError::Internal("WRONGTYPE".to_string())),
            }
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let mut entries = self.lock();
        if !purge_expired(&mut entries, key) {
            return Ok(Vec::new());
        }
        match &entries[key].value {
            Value::Set(set) => Ok(set.iter().cloned().collect()),
            _ => Err(AppError::Internal("WRONGTYPE".to_string())),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.check_available()?;
        let mut entries = self.lock();
        purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Stored {
            value: Value::SortedSet(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::SortedSet(members) => {
                members.insert(member.to_string(), score);
                Ok(())
            }
            _ => Err(AppError::Internal("WRONGTYPE".to_string())),
        }
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        self.check_available()?;
        let mut entries = self.lock();
        if !purge_expired(&mut entries, key) {
            return Ok(0);
        }
        if let Some(entry) = entries.get_mut(key) {
            match &mut entry.value {
                Value::SortedSet(members) => {
                    let before = members.len();
                    members.retain(|_, score| *score < min || *score > max);
                    return Ok((before - members.len()) as u64);
                }
                _ => return Err(AppError::Internal("WRONGTYPE".to_string())),
            }
        }
        Ok(0)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.check_available()?;
        let mut entries = self.lock();
        if !purge_expired(&mut entries, key) {
            return Ok(0);
        }
        match &entries[key].value {
            Value::SortedSet(members) => Ok(members.len() as u64),
            _ => Err(AppError::Internal("WRONGTYPE".to_string())),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
