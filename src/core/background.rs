//! Long-running cache maintenance: the Redis expiry listener that re-warms
//! reports as they age out, and the optional startup prewarm.

use crate::adapters::kv::zip_from_key;
use crate::core::engine::{GreenScoreEngine, Located};
use crate::domain::{ScoreCache, ZipCode};
use crate::utils::error::Result;
use futures::future::join_all;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmOutcome {
    Cached,
    InvalidZip,
    Failed,
}

/// Compute one report and store it. Only successful reports are cached.
pub async fn warm_zip(
    engine: &GreenScoreEngine,
    cache: &dyn ScoreCache,
    zip: &ZipCode,
) -> WarmOutcome {
    match engine.green_score(zip.as_str()).await {
        Ok(Located::Found(report)) => {
            let stored = match serde_json::to_value(&report) {
                Ok(value) => cache.set(zip, &value).await,
                Err(e) => Err(e.into()),
            };
            match stored {
                Ok(()) => WarmOutcome::Cached,
                Err(e) => {
                    tracing::warn!("⚠️ Could not cache report for {}: {}", zip, e);
                    WarmOutcome::Failed
                }
            }
        }
        Ok(Located::InvalidZip) => {
            tracing::warn!("⚠️ [ZIP {}] Invalid ZIP code, not cached", zip);
            WarmOutcome::InvalidZip
        }
        Err(e) => {
            tracing::error!("❌ [ZIP {}] Error: {}", zip, e);
            WarmOutcome::Failed
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrewarmSummary {
    pub cached: usize,
    pub skipped: usize,
}

/// 以 semaphore 限制同時計算數，每筆完成後再間隔 `spacing`
pub async fn prewarm(
    engine: Arc<GreenScoreEngine>,
    cache: Arc<dyn ScoreCache>,
    zips: Vec<ZipCode>,
    concurrency: usize,
    spacing: Duration,
) -> PrewarmSummary {
    tracing::info!(
        "🚀 Prewarming {} ZIPs (concurrency {}, spacing {:?})",
        zips.len(),
        concurrency,
        spacing
    );
    let semaphore = Semaphore::new(concurrency.max(1));

    let jobs = zips.iter().map(|zip| {
        let engine = engine.as_ref();
        let cache = cache.as_ref();
        let semaphore = &semaphore;
        async move {
            let outcome = match semaphore.acquire().await {
                Ok(_permit) => {
                    tracing::debug!("[ZIP {}] Starting computation", zip);
                    warm_zip(engine, cache, zip).await
                }
                Err(_) => WarmOutcome::Failed,
            };
            sleep(spacing).await;
            outcome
        }
    });
    let outcomes = join_all(jobs).await;

    let cached = outcomes
        .iter()
        .filter(|o| **o == WarmOutcome::Cached)
        .count();
    let summary = PrewarmSummary {
        cached,
        skipped: outcomes.len() - cached,
    };
    tracing::info!(
        "✅ Prewarm finished: {} cached, {} skipped",
        summary.cached,
        summary.skipped
    );
    summary
}

pub fn expired_channel(db: i64) -> String {
    format!("__keyevent@{}__:expired", db)
}

/// Subscribe to key expiry events and recompute expired reports.
/// Never returns; connection problems are retried after `retry`.
pub async fn run_expiry_listener(
    client: redis::Client,
    engine: Arc<GreenScoreEngine>,
    cache: Arc<dyn ScoreCache>,
    prefix: String,
    retry: Duration,
) {
    loop {
        match listen_for_expiry(&client, &engine, cache.as_ref(), &prefix).await {
            Ok(()) => tracing::warn!(
                "⚠️ [redis-expire] Subscription closed; retrying in {}s...",
                retry.as_secs()
            ),
            Err(e) => tracing::warn!(
                "⚠️ [redis-expire] Redis unavailable ({}); retrying in {}s...",
                e,
                retry.as_secs()
            ),
        }
        sleep(retry).await;
    }
}

async fn listen_for_expiry(
    client: &redis::Client,
    engine: &GreenScoreEngine,
    cache: &dyn ScoreCache,
    prefix: &str,
) -> Result<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    // 託管型 Redis 可能禁止 CONFIG，失敗時沿用伺服器現有設定
    if let Err(e) = redis::cmd("CONFIG")
        .arg("SET")
        .arg("notify-keyspace-events")
        .arg("Ex")
        .query_async::<_, ()>(&mut conn)
        .await
    {
        tracing::debug!("[redis-expire] CONFIG SET rejected: {}", e);
    }

    let channel = expired_channel(client.get_connection_info().redis.db);
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(&channel).await?;
    tracing::info!("🔔 [redis-expire] Listening on {}", channel);

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let key: String = match message.get_payload() {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("[redis-expire] Unreadable payload: {}", e);
                continue;
            }
        };
        let Some(zip) = zip_from_key(prefix, &key) else {
            continue;
        };
        tracing::info!("♻️ [redis-expire] {} expired, recomputing", key);
        warm_zip(engine, cache, &zip).await;
    }
    Ok(())
}
