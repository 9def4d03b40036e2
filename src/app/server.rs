use crate::adapters::houston_zips::HoustonZipSource;
use crate::adapters::http::build_client;
use crate::adapters::kv::{MemoryScoreCache, RedisScoreCache};
use crate::app::router::build_router;
use crate::app::state::AppState;
use crate::config::AppConfig;
use crate::core::background::{prewarm, run_expiry_listener};
use crate::core::GreenScoreEngine;
use crate::domain::ScoreCache;
use crate::utils::error::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn memory_cache(config: &AppConfig) -> Arc<dyn ScoreCache> {
    Arc::new(MemoryScoreCache::new(
        &config.cache.zip_prefix,
        config.cache.zip_ttl_seconds,
        config.cache.max_entries,
    ))
}

/// Redis when enabled and reachable; otherwise the in-process cache.
/// The returned client is set only when Redis is actually in use.
pub async fn build_cache(config: &AppConfig) -> (Arc<dyn ScoreCache>, Option<redis::Client>) {
    if !config.redis.enabled {
        tracing::info!("💾 Redis disabled, caching reports in memory");
        return (memory_cache(config), None);
    }

    let connected = match redis::Client::open(config.redis.url.as_str()) {
        Ok(client) => RedisScoreCache::connect(
            client.clone(),
            &config.cache.zip_prefix,
            config.cache.zip_ttl_seconds,
        )
        .await
        .map(|cache| (cache, client)),
        Err(e) => Err(e.into()),
    };

    match connected {
        Ok((cache, client)) => {
            tracing::info!("✅ Connected to Redis report cache");
            (Arc::new(cache), Some(client))
        }
        Err(e) => {
            tracing::warn!("⚠️ Redis unavailable ({}), caching reports in memory", e);
            (memory_cache(config), None)
        }
    }
}

fn spawn_background(
    config: &AppConfig,
    engine: &Arc<GreenScoreEngine>,
    cache: &Arc<dyn ScoreCache>,
    redis: Option<redis::Client>,
) -> Result<()> {
    if let Some(client) = redis.filter(|_| config.redis.expire_listener) {
        tokio::spawn(run_expiry_listener(
            client,
            engine.clone(),
            cache.clone(),
            config.cache.zip_prefix.clone(),
            Duration::from_secs(config.redis.listener_retry_s),
        ));
    }

    if config.prewarm.on_startup {
        let source = HoustonZipSource::new(
            build_client(&config.upstream)?,
            config.upstream.zippopotam_url.clone(),
        );
        let engine = engine.clone();
        let cache = cache.clone();
        let settings = config.prewarm.clone();
        tokio::spawn(async move {
            let zips = source.discover(settings.include_po_boxes).await;
            prewarm(
                engine,
                cache,
                zips,
                settings.concurrency,
                Duration::from_secs_f64(settings.spacing_s.max(0.0)),
            )
            .await;
        });
    }
    Ok(())
}

pub async fn serve(config: AppConfig) -> Result<()> {
    let engine = Arc::new(GreenScoreEngine::from_config(&config)?);
    let (cache, redis) = build_cache(&config).await;
    spawn_background(&config, &engine, &cache, redis)?;

    let state = AppState::new(
        engine,
        cache,
        config.rate_limit.per_minute,
        config.server.cors_origins.clone(),
        config.cache.http_max_age_seconds,
    );
    let app = build_router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("🚀 Green Score API listening on http://{}", address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
