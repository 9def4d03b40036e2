//! Tree canopy and impervious surface shares from NAIP imagery.
//!
//! Rasters are never read locally. The STAC API finds the most relevant
//! NAIP scene and the hosted tiler computes an NDVI histogram over the
//! area of interest with bin edges at the canopy and pavement thresholds.

use crate::adapters::http::{ensure_success, read_json};
use crate::adapters::{json_f64, round_to};
use crate::domain::{Coordinates, LandCover};
use crate::utils::error::{GreenScoreError, Result};
use crate::utils::ttl_cache::TtlCache;
use chrono::DateTime;
use reqwest::Client;
use serde_json::{json, Value};

pub const COLLECTION: &str = "naip";
pub const NDVI_EXPRESSION: &str = "(image_b4-image_b1)/(image_b4+image_b1)";
/// NDVI < 0.1 為鋪面，NDVI > 0.4 為樹冠
pub const HISTOGRAM_BINS: &str = "-1,0.1,0.4,1";

pub struct LandCoverClient {
    client: Client,
    stac_url: String,
    tiler_url: String,
    datetime: String,
    radius_deg: f64,
    cache: TtlCache<LandCover>,
}

#[derive(Debug)]
struct Scene {
    id: String,
    collection: String,
    acquired: String,
}

impl LandCoverClient {
    pub fn new(
        client: Client,
        stac_url: String,
        tiler_url: String,
        datetime: String,
        radius_deg: f64,
        ttl_seconds: u64,
        max_entries: u64,
    ) -> Self {
        Self {
            client,
            stac_url: stac_url.trim_end_matches('/').to_string(),
            tiler_url: tiler_url.trim_end_matches('/').to_string(),
            datetime,
            radius_deg,
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    pub async fn land_cover(&self, coords: Coordinates) -> Result<LandCover> {
        self.cache
            .get_or_try_insert(coords.cache_key(), || self.fetch(coords))
            .await
    }

    fn bbox(&self, coords: Coordinates) -> [f64; 4] {
        let r = self.radius_deg;
        [coords.lon - r, coords.lat - r, coords.lon + r, coords.lat + r]
    }

    async fn fetch(&self, coords: Coordinates) -> Result<LandCover> {
        let bbox = self.bbox(coords);
        let scene = self.find_scene(bbox).await?;
        tracing::debug!("NAIP scene {} ({})", scene.id, scene.acquired);

        let counts = self.ndvi_histogram(&scene, bbox).await?;
        let (canopy, pavement) = cover_percentages(&counts)?;

        Ok(LandCover {
            canopy,
            pavement,
            source: scene.collection,
            acquired: scene.acquired,
        })
    }

    async fn find_scene(&self, bbox: [f64; 4]) -> Result<Scene> {
        let response = self
            .client
            .post(format!("{}/search", self.stac_url))
            .json(&json!({
                "collections": [COLLECTION],
                "bbox": bbox,
                "datetime": self.datetime,
                "limit": 1,
            }))
            .send()
            .await?;
        let response = ensure_success("STAC API", response).await?;
        let body: Value = read_json(response).await?;

        let item = body
            .get("features")
            .and_then(Value::as_array)
            .and_then(|features| features.first())
            .ok_or_else(|| GreenScoreError::no_data("No NAIP imagery found."))?;

        let id = item
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GreenScoreError::no_data("No NAIP imagery found."))?
            .to_string();
        let collection = item
            .get("collection")
            .and_then(Value::as_str)
            .unwrap_or(COLLECTION)
            .to_string();
        let acquired = item
            .pointer("/properties/datetime")
            .and_then(Value::as_str)
            .map(normalize_datetime)
            .unwrap_or_default();

        Ok(Scene {
            id,
            collection,
            acquired,
        })
    }

    async fn ndvi_histogram(&self, scene: &Scene, bbox: [f64; 4]) -> Result<Vec<f64>> {
        let [west, south, east, north] = bbox;
        let aoi = json!({
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [west, south], [east, south], [east, north], [west, north], [west, south]
                ]]
            }
        });

        let response = self
            .client
            .post(format!("{}/item/statistics", self.tiler_url))
            .query(&[
                ("collection", scene.collection.as_str()),
                ("item", scene.id.as_str()),
                ("expression", NDVI_EXPRESSION),
                ("histogram_bins", HISTOGRAM_BINS),
            ])
            .json(&aoi)
            .send()
            .await?;
        let response = ensure_success("NAIP tiler", response).await?;
        let body: Value = read_json(response).await?;

        // properties.statistics 只有一個 band（NDVI 運算式）
        let histogram = body
            .pointer("/properties/statistics")
            .and_then(Value::as_object)
            .and_then(|stats| stats.values().next())
            .and_then(|band| band.get("histogram"))
            .and_then(Value::as_array)
            .and_then(|h| h.first())
            .and_then(Value::as_array)
            .ok_or_else(|| GreenScoreError::no_data("NAIP statistics carried no NDVI histogram"))?;

        Ok(histogram.iter().map(|c| json_f64(Some(c)).unwrap_or(0.0)).collect())
    }
}

fn normalize_datetime(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|_| raw.to_string())
}

/// Counts per bin `[-1,0.1) [0.1,0.4) [0.4,1]` → (canopy %, pavement %).
pub fn cover_percentages(counts: &[f64]) -> Result<(f64, f64)> {
    let total: f64 = counts.iter().sum();
    if counts.len() != 3 || total <= 0.0 {
        return Err(GreenScoreError::no_data(
            "NAIP statistics carried no valid pixels",
        ));
    }
    let pct = |n: f64| round_to(n / total * 100.0, 2);
    Ok((pct(counts[2]), pct(counts[0])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn landcover(server: &MockServer) -> LandCoverClient {
        LandCoverClient::new(
            Client::new(),
            server.url("/api/stac/v1"),
            server.url("/api/data/v1"),
            "2015-01-01/2025-12-31".to_string(),
            0.01,
            60,
            100,
        )
    }

    #[tokio::test]
    async fn ndvi_histogram_to_cover_shares() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/stac/v1/search")
                    .json_body_partial(r#"{"collections": ["naip"], "limit": 1}"#);
                then.status(200).json_body(json!({
                    "type": "FeatureCollection",
                    "features": [{
                        "id": "tx_m_2909501_ne_15_060_20220515",
                        "collection": "naip",
                        "properties": {"datetime": "2022-05-15T00:00:00Z"}
                    }]
                }));
            })
            .await;
        let stats = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/data/v1/item/statistics")
                    .query_param("collection", "naip")
                    .query_param("item", "tx_m_2909501_ne_15_060_20220515")
                    .query_param("histogram_bins", HISTOGRAM_BINS)
                    .query_param("expression", NDVI_EXPRESSION);
                then.status(200).json_body(json!({
                    "type": "Feature",
                    "properties": {"statistics": {
                        "(image_b4-image_b1)/(image_b4+image_b1)": {
                            "min": -0.4, "max": 0.8,
                            "histogram": [[450, 300, 250], [-1.0, 0.1, 0.4, 1.0]]
                        }
                    }}
                }));
            })
            .await;

        let cover = landcover(&server)
            .land_cover(Coordinates::new(29.75, -95.36))
            .await
            .unwrap();

        search.assert_async().await;
        stats.assert_async().await;
        assert_eq!(cover.canopy, 25.0);
        assert_eq!(cover.pavement, 45.0);
        assert_eq!(cover.source, "naip");
        assert_eq!(cover.acquired, "2022-05-15T00:00:00+00:00");
    }

    #[tokio::test]
    async fn no_scene_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/stac/v1/search");
                then.status(200).json_body(json!({"features": []}));
            })
            .await;

        let err = landcover(&server)
            .land_cover(Coordinates::new(64.8, -147.7))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No NAIP imagery found.");
    }

    #[test]
    fn empty_histogram_is_rejected() {
        assert!(cover_percentages(&[0.0, 0.0, 0.0]).is_err());
        assert!(cover_percentages(&[1.0, 2.0]).is_err());
        assert_eq!(cover_percentages(&[1.0, 1.0, 1.0]).unwrap(), (33.33, 33.33));
    }
}
