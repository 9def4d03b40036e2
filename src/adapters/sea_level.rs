//! NOAA Sea Level Rise Viewer: presence of inundation polygons within 5 km
//! for the 1..6 ft scenarios.

use crate::adapters::http::{ensure_success, read_json};
use crate::core::scoring::sea_level_score;
use crate::domain::{Coordinates, SeaLevelRise};
use crate::utils::error::{GreenScoreError, Result};
use crate::utils::ttl_cache::TtlCache;
use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub const SOURCE: &str = "NOAA Sea Level Rise Viewer";
pub const METHOD: &str = "Presence/absence of inundation polygons within 5 km";
pub const SCENARIO_FEET: [u32; 6] = [1, 2, 3, 4, 5, 6];
const BUFFER_M: u32 = 5000;
const REQUEST_TIMEOUT_S: u64 = 20;

pub struct SeaLevelClient {
    client: Client,
    base_url: String,
    cache: TtlCache<SeaLevelRise>,
}

impl SeaLevelClient {
    pub fn new(client: Client, base_url: String, ttl_seconds: u64, max_entries: u64) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    pub async fn sea_level_rise(&self, coords: Coordinates) -> Result<SeaLevelRise> {
        self.cache
            .get_or_try_insert(coords.cache_key(), || self.fetch(coords))
            .await
    }

    async fn fetch(&self, coords: Coordinates) -> Result<SeaLevelRise> {
        let results = join_all(
            SCENARIO_FEET
                .iter()
                .map(|feet| self.scenario_inundated(coords, *feet)),
        )
        .await;

        let mut inundated_feet = BTreeMap::new();
        let mut inundated = Vec::new();
        for (feet, result) in SCENARIO_FEET.iter().zip(results) {
            let hit = match result {
                Ok(hit) => Some(hit),
                Err(e) => {
                    tracing::debug!("Sea level {} ft query failed: {}", feet, e);
                    None
                }
            };
            if hit == Some(true) {
                inundated.push(*feet);
            }
            inundated_feet.insert(feet.to_string(), hit);
        }

        // 全部失敗時不給 100 分，也不進快取
        if inundated_feet.values().all(Option::is_none) {
            return Err(GreenScoreError::no_data(
                "NOAA sea level rise service did not answer for any scenario",
            ));
        }

        Ok(SeaLevelRise {
            score: sea_level_score(&inundated),
            inundated_feet,
            source: SOURCE.to_string(),
            method: METHOD.to_string(),
        })
    }

    async fn scenario_inundated(&self, coords: Coordinates, feet: u32) -> Result<bool> {
        let url = format!("{}/slr_{}ft/MapServer/0/query", self.base_url, feet);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_S))
            .query(&[
                ("geometry", format!("{},{}", coords.lon, coords.lat)),
                ("geometryType", "esriGeometryPoint".to_string()),
                ("inSR", "4326".to_string()),
                ("spatialRel", "esriSpatialRelIntersects".to_string()),
                ("distance", BUFFER_M.to_string()),
                ("units", "meters".to_string()),
                ("outFields", "OBJECTID".to_string()),
                ("returnGeometry", "false".to_string()),
                ("f", "json".to_string()),
            ])
            .send()
            .await?;
        let response = ensure_success("NOAA SLR", response).await?;
        let body: Value = read_json(response).await?;

        Ok(body
            .get("features")
            .and_then(Value::as_array)
            .is_some_and(|features| !features.is_empty()))
    }
}
