use crate::utils::error::Result;
use moka::future::Cache;
use std::future::Future;
use std::time::Duration;

/// Time-bounded memo for upstream lookups. Only successful results are
/// stored; errors are retried on the next call.
#[derive(Clone)]
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    inner: Cache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(ttl_seconds: u64, max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(Duration::from_secs(ttl_seconds.max(1)))
                .build(),
        }
    }

    pub async fn get_or_try_insert<F, Fut>(&self, key: String, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(hit) = self.inner.get(&key).await {
            tracing::debug!(key = %key, "ttl cache hit");
            return Ok(hit);
        }
        let value = fetch().await?;
        self.inner.insert(key, value.clone()).await;
        Ok(value)
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::GreenScoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn caches_successes_only() {
        let cache: TtlCache<u32> = TtlCache::new(60, 100);
        let calls = AtomicUsize::new(0);

        let failed = cache
            .get_or_try_insert("k".to_string(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GreenScoreError::no_data("down"))
            })
            .await;
        assert!(failed.is_err());

        for _ in 0..3 {
            let v = cache
                .get_or_try_insert("k".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(v, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get("k").await, Some(7));
    }
}
