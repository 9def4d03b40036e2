#![allow(dead_code)]

use green_score::adapters::kv::MemoryScoreCache;
use green_score::config::AppConfig;
use green_score::domain::ScoreCache;
use green_score::{AppState, GreenScoreEngine};
use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;

/// Every upstream points at one mock server; Redis is off.
pub fn config_for(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.redis.enabled = false;
    config.keys.airnow = Some("test-key".to_string());
    config.keys.openaq = Some("test-key".to_string());

    let upstream = &mut config.upstream;
    upstream.nominatim_url = server.url("/nominatim/search");
    upstream.airnow_url = server.url("/airnow/current/");
    upstream.census_url = server.url("/census/profile");
    upstream.rtfi_url = server.url("/rtfi/flooding");
    upstream.epa_frs_url = server.url("/frs/get_facilities");
    upstream.noaa_slr_url = server.url("/slr");
    upstream.stac_url = server.url("/stac");
    upstream.tiler_url = server.url("/tiler");
    upstream.openaq_url = server.url("/openaq/v3");
    upstream.zippopotam_url = server.url("/zippopotam/houston");
    upstream.timeout_s = 5;

    config.overpass.mirrors = vec![server.url("/overpass/interpreter")];
    config.overpass.min_interval_s = 0.0;
    config.overpass.max_retries = 1;
    config.overpass.backoff_start_s = 0.01;
    config.overpass.backoff_max_s = 0.01;
    config.overpass.hedge_mirrors = 1;
    config.overpass.attempt_timeout_s = 5;
    config
}

pub async fn mock_geocode(server: &MockServer, zip: &str, lat: &str, lon: &str) {
    let body = json!([{"lat": lat, "lon": lon}]);
    let zip = zip.to_string();
    server
        .mock_async(move |when, then| {
            when.method(GET)
                .path("/nominatim/search")
                .query_param("postalcode", zip);
            then.status(200).json_body(body);
        })
        .await;
}

/// AQI 112 (O3) → score 65.
pub async fn mock_airnow(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/airnow/current/");
            then.status(200).json_body(json!([{
                "DateObserved": "2024-06-01 ",
                "HourObserved": 14,
                "ReportingArea": "Houston",
                "StateCode": "TX",
                "Latitude": 29.767,
                "Longitude": -95.22,
                "ParameterName": "O3",
                "AQI": 112,
                "Category": {"Number": 3, "Name": "Unhealthy for Sensitive Groups"}
            }]));
        })
        .await;
}

pub fn engine_for(server: &MockServer) -> Arc<GreenScoreEngine> {
    Arc::new(GreenScoreEngine::from_config(&config_for(server)).unwrap())
}

pub fn state_for(server: &MockServer, per_minute: usize) -> (AppState, Arc<dyn ScoreCache>) {
    let cache: Arc<dyn ScoreCache> = Arc::new(MemoryScoreCache::new("greenscore:", 3600, 100));
    let state = AppState::new(
        engine_for(server),
        cache.clone(),
        per_minute,
        vec!["https://ecoscore-kappa.vercel.app".to_string()],
        600,
    );
    (state, cache)
}
