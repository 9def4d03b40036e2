//! Riverine flood risk from proximity to currently flooding USGS reference
//! points.
//!
//! Upstream failures never fail the metric: the score falls back to 100 and
//! the failure is reported in `error`.

use crate::adapters::http::{ensure_success, read_json};
use crate::adapters::{json_f64, round_to};
use crate::core::scoring::{flood_distance_score, haversine_km};
use crate::domain::{Coordinates, FloodRisk};
use crate::utils::error::{GreenScoreError, Result};
use crate::utils::ttl_cache::TtlCache;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

pub const SOURCE: &str = "USGS Real-Time Flood Impact API";
const POINTS_KEY: &str = "flooding";
const REQUEST_TIMEOUT_S: u64 = 20;

pub struct FloodClient {
    client: Client,
    url: String,
    // 淹水點清單與查詢位置無關，整份快取
    cache: TtlCache<Vec<(f64, f64)>>,
}

impl FloodClient {
    pub fn new(client: Client, url: String, ttl_seconds: u64) -> Self {
        Self {
            client,
            url,
            cache: TtlCache::new(ttl_seconds, 1),
        }
    }

    pub async fn flood_risk(&self, coords: Coordinates) -> FloodRisk {
        match self
            .cache
            .get_or_try_insert(POINTS_KEY.to_string(), || self.fetch_points())
            .await
        {
            Ok(points) => score_points(coords, &points),
            Err(e) => {
                tracing::warn!("⚠️ Flood data unavailable: {}", e);
                FloodRisk {
                    score: 100,
                    nearest_flood_distance_km: None,
                    error: Some(describe(&e)),
                    source: SOURCE.to_string(),
                }
            }
        }
    }

    async fn fetch_points(&self) -> Result<Vec<(f64, f64)>> {
        let response = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_S))
            .send()
            .await?;
        let response = ensure_success("Flood API", response).await?;
        let body: Value = read_json(response).await?;

        let points = match &body {
            Value::Array(points) => points.as_slice(),
            Value::Object(map) => map
                .get("referencePoints")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            _ => &[],
        };

        Ok(points
            .iter()
            .filter_map(|p| Some((json_f64(p.get("latitude"))?, json_f64(p.get("longitude"))?)))
            .collect())
    }
}

fn describe(error: &GreenScoreError) -> String {
    match error {
        GreenScoreError::HttpError(e) => format!("Failed to fetch flood data: {}", e),
        GreenScoreError::SerializationError(e) => format!("Failed to parse flood data: {}", e),
        other => other.to_string(),
    }
}

pub fn score_points(coords: Coordinates, points: &[(f64, f64)]) -> FloodRisk {
    let nearest = points
        .iter()
        .map(|(lat, lon)| haversine_km(coords.lat, coords.lon, *lat, *lon))
        .min_by(f64::total_cmp);

    FloodRisk {
        score: nearest.map_or(100, flood_distance_score),
        nearest_flood_distance_km: nearest.map(|d| round_to(d, 2)),
        error: None,
        source: SOURCE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn accepts_plain_list_and_caches_points() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/referencepoints/flooding");
                then.status(200).json_body(json!([
                    {"latitude": 29.75, "longitude": -95.36},
                    {"latitude": "bad", "longitude": -95.0}
                ]));
            })
            .await;

        let client = FloodClient::new(Client::new(), server.url("/referencepoints/flooding"), 60);
        let here = client.flood_risk(Coordinates::new(29.75, -95.36)).await;
        let far = client.flood_risk(Coordinates::new(32.78, -96.80)).await;

        assert_eq!(here.score, 0);
        assert_eq!(here.nearest_flood_distance_km, Some(0.0));
        assert!(far.score > 95);
        assert!(far.error.is_none());
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn accepts_reference_points_object() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(200)
                    .json_body(json!({"referencePoints": [{"latitude": 30.0, "longitude": -95.36}]}));
            })
            .await;

        let client = FloodClient::new(Client::new(), server.url("/f"), 60);
        let risk = client.flood_risk(Coordinates::new(29.75, -95.36)).await;
        // ≈ 27.8 km
        assert_eq!(risk.nearest_flood_distance_km, Some(27.8));
        assert_eq!(risk.score, flood_distance_score(27.8));
    }

    #[tokio::test]
    async fn upstream_failure_still_scores_100() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(502).body("bad gateway");
            })
            .await;

        let client = FloodClient::new(Client::new(), server.url("/f"), 60);
        let risk = client.flood_risk(Coordinates::new(29.75, -95.36)).await;
        assert_eq!(risk.score, 100);
        assert_eq!(risk.nearest_flood_distance_km, None);
        assert_eq!(risk.error.as_deref(), Some("Flood API returned 502: bad gateway"));
    }

    #[test]
    fn no_flooding_points_scores_100() {
        let risk = score_points(Coordinates::new(0.0, 0.0), &[]);
        assert_eq!(risk.score, 100);
        assert_eq!(risk.nearest_flood_distance_km, None);
    }
}
