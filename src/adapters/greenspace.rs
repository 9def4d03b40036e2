//! Parks and other public green areas around a point.
//!
//! The score blends a distance component (nearest centroid, exponential
//! decay) with a density component (parks per km², diminishing returns).

use crate::adapters::overpass::{OverpassClient, OverpassElement};
use crate::adapters::round_to;
use crate::config::GreenspaceConfig;
use crate::core::scoring::{blend_scores, haversine_m, park_density_score, smooth_distance_score};
use crate::domain::{Coordinates, GreenSpace};
use crate::utils::error::{GreenScoreError, Result};
use crate::utils::ttl_cache::TtlCache;
use std::collections::HashSet;
use std::sync::Arc;

pub const GREEN_TAGS: [&str; 6] = [
    r#"["leisure"="park"]"#,
    r#"["leisure"="garden"]"#,
    r#"["leisure"="common"]"#,
    r#"["leisure"="recreation_ground"]"#,
    r#"["leisure"="nature_reserve"]"#,
    r#"["boundary"="protected_area"]"#,
];
const PUBLIC_ONLY: &str = r#"["access"!="private"]"#;

pub fn build_query(config: &GreenspaceConfig, coords: Coordinates, timeout_s: u64) -> String {
    let access = if config.exclude_private { PUBLIC_ONLY } else { "" };
    let mut query = format!("[out:json][timeout:{}];\n(\n", timeout_s);
    for tag in GREEN_TAGS {
        for kind in ["node", "way", "relation"] {
            query.push_str(&format!(
                "  {}{}{}(around:{},{},{});\n",
                kind, tag, access, config.radius_m, coords.lat, coords.lon
            ));
        }
    }
    query.push_str(");\nout center tags;");
    query
}

/// 以 (type, id) 去重後的中心點
fn unique_centroids(elements: &[OverpassElement]) -> Vec<(f64, f64)> {
    let mut seen = HashSet::new();
    elements
        .iter()
        .filter_map(|e| {
            let position = e.position()?;
            seen.insert((e.kind.as_str(), e.id))
                .then_some((position.lat, position.lon))
        })
        .collect()
}

pub struct GreenspaceClient {
    overpass: Arc<OverpassClient>,
    config: GreenspaceConfig,
    cache: TtlCache<GreenSpace>,
}

impl GreenspaceClient {
    pub fn new(
        overpass: Arc<OverpassClient>,
        config: GreenspaceConfig,
        ttl_seconds: u64,
        max_entries: u64,
    ) -> Self {
        Self {
            overpass,
            config,
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    pub async fn green_space(&self, coords: Coordinates) -> Result<GreenSpace> {
        self.cache
            .get_or_try_insert(coords.cache_key(), || self.fetch(coords))
            .await
    }

    async fn fetch(&self, coords: Coordinates) -> Result<GreenSpace> {
        if !coords.is_valid() {
            return Err(GreenScoreError::ValidationError {
                message: "lat/lon out of bounds".to_string(),
            });
        }
        if self.config.radius_m == 0 {
            return Err(GreenScoreError::ValidationError {
                message: "radius_m must be positive".to_string(),
            });
        }

        let query = build_query(&self.config, coords, self.overpass.query_timeout_s());
        let elements = self.overpass.query(&query).await?;
        let centroids = unique_centroids(&elements);

        let nearest = centroids
            .iter()
            .map(|(lat, lon)| haversine_m(coords.lat, coords.lon, *lat, *lon))
            .min_by(f64::total_cmp);

        let radius = f64::from(self.config.radius_m);
        let distance_score = smooth_distance_score(nearest, self.config.alpha_m);
        let density_score = park_density_score(centroids.len(), radius, self.config.density_k);

        Ok(GreenSpace {
            score: blend_scores(distance_score, density_score, self.config.blend_distance),
            nearest_distance_m: nearest.map(|d| round_to(d, 1)),
            num_parks: centroids.len(),
        })
    }
}
