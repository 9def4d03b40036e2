//! Surface water features (lakes, ponds, reservoirs, riverbanks) nearby.

use crate::adapters::overpass::OverpassClient;
use crate::core::scoring::density_exp_score;
use crate::domain::{Coordinates, WaterAvailability};
use crate::utils::error::Result;
use crate::utils::ttl_cache::TtlCache;
use std::sync::Arc;

pub const SOURCE: &str = "OSM via Overpass API";
pub const RADIUS_M: u32 = 1000;
const ALPHA: f64 = 0.45;

pub struct WaterClient {
    overpass: Arc<OverpassClient>,
    cache: TtlCache<WaterAvailability>,
}

impl WaterClient {
    pub fn new(overpass: Arc<OverpassClient>, ttl_seconds: u64, max_entries: u64) -> Self {
        Self {
            overpass,
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    pub async fn water(&self, coords: Coordinates) -> Result<WaterAvailability> {
        self.cache
            .get_or_try_insert(coords.cache_key(), || self.fetch(coords))
            .await
    }

    async fn fetch(&self, coords: Coordinates) -> Result<WaterAvailability> {
        let around = format!("around:{},{},{}", RADIUS_M, coords.lat, coords.lon);
        let query = format!(
            "[out:json][timeout:60];\n(\n  way({around})[natural=water];\n  relation({around})[type=multipolygon][natural=water];\n  way({around})[waterway=riverbank];\n);\nout ids;"
        );

        let elements = self.overpass.query(&query).await?;
        let water_features = elements
            .iter()
            .filter(|e| e.kind == "way" || e.kind == "relation")
            .count();

        Ok(WaterAvailability {
            score: density_exp_score(water_features, f64::from(RADIUS_M), ALPHA),
            water_features,
            source: SOURCE.to_string(),
        })
    }
}
