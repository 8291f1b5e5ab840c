use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::error::{AppError, Result};

/// The key-value store boundary.
///
/// This is the only surface the ephemeral services depend on. It mirrors
/// the small primitive set the shared store offers: string get/set with
/// expiry, counters, set and sorted-set collections, pattern scans and a
/// liveness check. Implementations must keep single-key operations atomic;
/// everything above relies on that instead of locks.
#[async_trait]
pub trait Kvs: Send + Sync {
    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// `SETEX key ttl value`.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// `DEL key...`; returns how many keys were actually removed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// `EXISTS key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// `INCR key`; returns the counter value after the increment.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// `EXPIRE key ttl`; returns whether the key existed.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// `KEYS pattern` (glob-style `*` wildcards).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// `SADD set member`.
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// `SREM set member`.
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// `SMEMBERS set`.
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// `ZADD sorted-set score member`.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// `ZREMRANGEBYSCORE sorted-set min max`; returns how many were removed.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    /// `ZCARD sorted-set`.
    async fn zcard(&self, key: &str) -> Result<u64>;

    /// `PING` liveness check.
    async fn ping(&self) -> Result<()>;
}

/// The production `Kvs` implementation over a shared Redis connection.
///
/// One `ConnectionManager` is created per process and cloned per call; the
/// manager multiplexes and reconnects on its own. Every operation is
/// wrapped in a bounded timeout so a slow or absent Redis cannot stall
/// request handling — callers see an error and take their degraded path.
#[derive(Clone)]
pub struct RedisKvs {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisKvs {
    /// Creates a new `RedisKvs`.
    ///
    /// # Arguments
    ///
    /// * `conn` - The shared Redis connection manager.
    /// * `op_timeout` - The bound applied to every single operation.
    pub fn new(conn: ConnectionManager, op_timeout: Duration) -> Self {
        Self { conn, op_timeout }
    }

    async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AppError::KvsTimeout(self.op_timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl Kvs for RedisKvs {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        self.run(async move { redis::cmd("GET").arg(key).query_async(&mut conn).await })
            .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run(async move {
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_secs)
                .arg(value)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        self.run(async move { redis::cmd("DEL").arg(keys).query_async(&mut conn).await })
            .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        self.run(async move { redis::cmd("EXISTS").arg(key).query_async(&mut conn).await })
            .await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        self.run(async move { redis::cmd("INCR").arg(key).query_async(&mut conn).await })
            .await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        self.run(async move {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        self.run(async move { redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await })
            .await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run(async move {
            redis::cmd("SADD")
                .arg(key)
                .arg(member)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run(async move {
            redis::cmd("SREM")
                .arg(key)
                .arg(member)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        self.run(async move { redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await })
            .await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run(async move {
            redis::cmd("ZADD")
                .arg(key)
                .arg(score)
                .arg(member)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.run(async move {
            redis::cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg(min)
                .arg(max)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.run(async move { redis::cmd("ZCARD").arg(key).query_async(&mut conn).await })
            .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = self
            .run(async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(())
    }
}
