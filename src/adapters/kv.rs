//! Whole-report cache keyed by ZIP.
//!
//! Redis is the production store; keys are `<prefix><zip>` holding the
//! report JSON with a `SETEX` lifetime so expiry notifications can drive
//! re-warming. `MemoryScoreCache` keeps the same contract in-process.

use crate::domain::{ScoreCache, ZipCode};
use crate::utils::error::Result;
use async_trait::async_trait;
use moka::future::Cache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

pub fn cache_key(prefix: &str, zip: &ZipCode) -> String {
    format!("{}{}", prefix, zip)
}

/// 反查過期事件中的 key；非本前綴或非合法 ZIP 時回傳 None
pub fn zip_from_key(prefix: &str, key: &str) -> Option<ZipCode> {
    key.strip_prefix(prefix).and_then(ZipCode::parse)
}

#[derive(Clone)]
pub struct RedisScoreCache {
    conn: ConnectionManager,
    prefix: String,
    ttl_seconds: u64,
}

impl RedisScoreCache {
    pub async fn connect(client: redis::Client, prefix: &str, ttl_seconds: u64) -> Result<Self> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            ttl_seconds,
        })
    }

    fn key(&self, zip: &ZipCode) -> String {
        cache_key(&self.prefix, zip)
    }
}

#[async_trait]
impl ScoreCache for RedisScoreCache {
    async fn get(&self, zip: &ZipCode) -> Result<Option<Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(zip)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, zip: &ZipCode, report: &Value) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(report)?;
        redis::cmd("SETEX")
            .arg(self.key(zip))
            .arg(self.ttl_seconds)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ttl(&self, zip: &ZipCode) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        // -2 不存在，-1 無期限
        let ttl: i64 = conn.ttl(self.key(zip)).await?;
        Ok((ttl >= 0).then_some(ttl))
    }
}

/// In-process `ScoreCache` used when Redis is disabled.
#[derive(Clone)]
pub struct MemoryScoreCache {
    entries: Cache<String, (Value, Instant)>,
    prefix: String,
    ttl: Duration,
}

impl MemoryScoreCache {
    pub fn new(prefix: &str, ttl_seconds: u64, max_entries: u64) -> Self {
        let ttl = Duration::from_secs(ttl_seconds.max(1));
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
            prefix: prefix.to_string(),
            ttl,
        }
    }
}

#[async_trait]
impl ScoreCache for MemoryScoreCache {
    async fn get(&self, zip: &ZipCode) -> Result<Option<Value>> {
        let key = cache_key(&self.prefix, zip);
        Ok(self.entries.get(&key).await.map(|(report, _)| report))
    }

    async fn set(&self, zip: &ZipCode, report: &Value) -> Result<()> {
        let key = cache_key(&self.prefix, zip);
        self.entries
            .insert(key, (report.clone(), Instant::now() + self.ttl))
            .await;
        Ok(())
    }

    async fn ttl(&self, zip: &ZipCode) -> Result<Option<i64>> {
        let key = cache_key(&self.prefix, zip);
        Ok(self.entries.get(&key).await.map(|(_, expires_at)| {
            expires_at.saturating_duration_since(Instant::now()).as_secs() as i64
        }))
    }
}
