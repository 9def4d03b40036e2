//! Road-traffic exposure from OSM highway geometry.

use crate::adapters::overpass::{OverpassClient, OverpassElement};
use crate::adapters::round_to;
use crate::core::scoring::normalize_traffic;
use crate::domain::{Coordinates, Traffic};
use crate::utils::error::Result;
use crate::utils::ttl_cache::TtlCache;
use std::sync::Arc;

/// 經緯度差換算公尺的粗略係數
const METERS_PER_DEGREE: f64 = 111_000.0;
const QUERY_TIMEOUT_S: u64 = 180;

/// Population placeholder until a real per-ZIP source is wired in.
pub const POPULATION_ESTIMATE: u32 = 10_000;

pub fn road_weight(highway: &str) -> f64 {
    match highway {
        "motorway" => 1.0,
        "trunk" => 0.9,
        "primary" => 0.8,
        "secondary" => 0.6,
        "tertiary" => 0.5,
        "residential" => 0.2,
        _ => 0.1,
    }
}

/// Urban areas get a tighter search radius.
pub fn radius_for_population(population: u32) -> u32 {
    if population > 10_000 {
        1000
    } else if population > 5_000 {
        2000
    } else {
        3000
    }
}

fn way_length_m(way: &OverpassElement) -> f64 {
    way.geometry
        .windows(2)
        .filter_map(|pair| match (pair[0], pair[1]) {
            (Some(a), Some(b)) => {
                let (dy, dx) = (b.lat - a.lat, b.lon - a.lon);
                Some((dy * dy + dx * dx).sqrt() * METERS_PER_DEGREE)
            }
            _ => None,
        })
        .sum()
}

pub fn weighted_road_length(ways: &[OverpassElement]) -> f64 {
    ways.iter()
        .filter(|way| way.kind == "way" && way.geometry.len() >= 2)
        .filter_map(|way| way.tag("highway").map(|highway| (way, road_weight(highway))))
        .map(|(way, weight)| way_length_m(way) * weight)
        .sum()
}

pub struct TrafficClient {
    overpass: Arc<OverpassClient>,
    cache: TtlCache<Traffic>,
}

impl TrafficClient {
    pub fn new(overpass: Arc<OverpassClient>, ttl_seconds: u64, max_entries: u64) -> Self {
        Self {
            overpass,
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    pub async fn traffic(&self, coords: Coordinates) -> Result<Traffic> {
        self.cache
            .get_or_try_insert(coords.cache_key(), || self.fetch(coords))
            .await
    }

    async fn fetch(&self, coords: Coordinates) -> Result<Traffic> {
        let radius = radius_for_population(POPULATION_ESTIMATE);
        let query = format!(
            "[out:json][timeout:{}];\nway(around:{},{},{})[\"highway\"];\nout geom tags;",
            QUERY_TIMEOUT_S, radius, coords.lat, coords.lon
        );
        let ways = self.overpass.query(&query).await?;
        let weighted = weighted_road_length(&ways);
        tracing::debug!(
            "Traffic: {} ways, weighted length {:.0} m within {} m",
            ways.len(),
            weighted,
            radius
        );

        Ok(Traffic {
            score: normalize_traffic(weighted, f64::from(radius)),
            weighted_road_length: round_to(weighted, 2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::overpass::tests::fast_config;
    use httpmock::prelude::*;
    use reqwest::Client;
    use serde_json::json;

    #[test]
    fn population_heuristic_radius() {
        assert_eq!(radius_for_population(POPULATION_ESTIMATE), 2000);
        assert_eq!(radius_for_population(50_000), 1000);
        assert_eq!(radius_for_population(800), 3000);
    }

    #[test]
    fn unknown_road_classes_get_the_floor_weight() {
        assert_eq!(road_weight("motorway"), 1.0);
        assert_eq!(road_weight("footway"), 0.1);
    }

    #[tokio::test]
    async fn weights_road_length_by_class() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({
                    "elements": [
                        {
                            "type": "way", "id": 1, "tags": {"highway": "motorway"},
                            "geometry": [{"lat": 0.0, "lon": 0.0}, {"lat": 0.0, "lon": 0.01}]
                        },
                        {
                            "type": "way", "id": 2, "tags": {"highway": "residential"},
                            "geometry": [{"lat": 0.0, "lon": 0.0}, {"lat": 0.01, "lon": 0.0}]
                        },
                        {
                            "type": "way", "id": 3, "tags": {"name": "no highway tag"},
                            "geometry": [{"lat": 0.0, "lon": 0.0}, {"lat": 1.0, "lon": 0.0}]
                        },
                        {
                            "type": "way", "id": 4, "tags": {"highway": "primary"},
                            "geometry": [{"lat": 0.0, "lon": 0.0}]
                        }
                    ]
                }));
            })
            .await;

        let overpass = Arc::new(OverpassClient::new(
            Client::new(),
            fast_config(vec![server.url("/i")]),
        ));
        let traffic = TrafficClient::new(overpass, 60, 100)
            .traffic(Coordinates::new(29.75, -95.36))
            .await
            .unwrap();

        // 1110 m motorway + 0.2 × 1110 m residential
        assert_eq!(traffic.weighted_road_length, 1332.0);
        assert_eq!(traffic.score, 86);
    }
}
