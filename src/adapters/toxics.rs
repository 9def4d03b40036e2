//! Superfund (SEMS) facilities near a point, via the EPA Facility Registry
//! Service.

use crate::adapters::http::{ensure_success, read_json};
use crate::adapters::{json_f64, round_to};
use crate::core::scoring::{haversine_miles, normalize_toxic_sites};
use crate::domain::{Coordinates, ToxicSites};
use crate::utils::error::Result;
use crate::utils::ttl_cache::TtlCache;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT_S: u64 = 60;

pub struct ToxicsClient {
    client: Client,
    url: String,
    radius_miles: f64,
    cache: TtlCache<ToxicSites>,
}

impl ToxicsClient {
    pub fn new(
        client: Client,
        url: String,
        radius_miles: f64,
        ttl_seconds: u64,
        max_entries: u64,
    ) -> Self {
        Self {
            client,
            url,
            radius_miles,
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    pub async fn toxic_sites(&self, coords: Coordinates) -> Result<ToxicSites> {
        self.cache
            .get_or_try_insert(coords.cache_key(), || self.fetch(coords))
            .await
    }

    async fn fetch(&self, coords: Coordinates) -> Result<ToxicSites> {
        let response = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_S))
            .query(&[
                ("latitude83", coords.lat.to_string()),
                ("longitude83", coords.lon.to_string()),
                ("search_radius", self.radius_miles.to_string()),
                ("pgm_sys_acrnm", "SEMS".to_string()),
                ("output", "JSON".to_string()),
                ("program_output", "N".to_string()),
            ])
            .send()
            .await?;
        let response = ensure_success("EPA FRS API", response).await?;
        let body: Value = read_json(response).await?;

        let facilities = body
            .pointer("/Results/FRSFacility")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(summarize(coords, facilities, self.radius_miles))
    }
}

fn summarize(coords: Coordinates, facilities: &[Value], radius_miles: f64) -> ToxicSites {
    if facilities.is_empty() {
        return ToxicSites {
            score: 100,
            num_sites: 0,
            nearest_distance_miles: None,
        };
    }

    let distances: Vec<f64> = facilities
        .iter()
        .filter_map(|facility| {
            let lat = json_f64(facility.get("Latitude83"))?;
            let lon = json_f64(facility.get("Longitude83"))?;
            Some(haversine_miles(coords.lat, coords.lon, lat, lon))
        })
        .collect();

    // 有設施但座標全缺時，視為在搜尋半徑邊緣
    let nearest = distances
        .iter()
        .copied()
        .min_by(f64::total_cmp)
        .unwrap_or(radius_miles);

    ToxicSites {
        score: normalize_toxic_sites(distances.len(), Some(nearest)),
        num_sites: distances.len(),
        nearest_distance_miles: Some(round_to(nearest, 2)),
    }
}
