use crate::app::rate_limit::RateLimiter;
use crate::core::GreenScoreEngine;
use crate::domain::ScoreCache;
use std::sync::Arc;

/// Shared handler state; cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<GreenScoreEngine>,
    pub cache: Arc<dyn ScoreCache>,
    pub limiter: Arc<RateLimiter>,
    pub cors_origins: Arc<Vec<String>>,
    pub max_age_seconds: u64,
}

impl AppState {
    pub fn new(
        engine: Arc<GreenScoreEngine>,
        cache: Arc<dyn ScoreCache>,
        rate_limit_per_minute: usize,
        cors_origins: Vec<String>,
        max_age_seconds: u64,
    ) -> Self {
        Self {
            engine,
            cache,
            limiter: Arc::new(RateLimiter::per_minute(rate_limit_per_minute)),
            cors_origins: Arc::new(cors_origins),
            max_age_seconds,
        }
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.cors_origins.iter().any(|allowed| allowed == origin)
    }
}
