use crate::domain::model::ZipCode;
use crate::utils::error::Result;
use async_trait::async_trait;

/// 整份報告的快取（預設由 Redis 實作）
#[async_trait]
pub trait ScoreCache: Send + Sync {
    async fn get(&self, zip: &ZipCode) -> Result<Option<serde_json::Value>>;
    async fn set(&self, zip: &ZipCode, report: &serde_json::Value) -> Result<()>;
    /// Remaining lifetime in seconds; `None` when the key is absent or has no expiry.
    async fn ttl(&self, zip: &ZipCode) -> Result<Option<i64>>;
}
