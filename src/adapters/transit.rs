//! Public transit stops within walking distance (~15 minutes).

use crate::adapters::overpass::OverpassClient;
use crate::core::scoring::density_exp_score;
use crate::domain::{Coordinates, TransitAccess};
use crate::utils::error::Result;
use crate::utils::ttl_cache::TtlCache;
use std::sync::Arc;

pub const SOURCE: &str = "OSM via Overpass API";
pub const RADIUS_M: u32 = 1500;
const ALPHA: f64 = 0.22;

pub struct TransitClient {
    overpass: Arc<OverpassClient>,
    cache: TtlCache<TransitAccess>,
}

impl TransitClient {
    pub fn new(overpass: Arc<OverpassClient>, ttl_seconds: u64, max_entries: u64) -> Self {
        Self {
            overpass,
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    pub async fn transit_access(&self, coords: Coordinates) -> Result<TransitAccess> {
        self.cache
            .get_or_try_insert(coords.cache_key(), || self.fetch(coords))
            .await
    }

    async fn fetch(&self, coords: Coordinates) -> Result<TransitAccess> {
        let around = format!("around:{},{},{}", RADIUS_M, coords.lat, coords.lon);
        let query = format!(
            "[out:json][timeout:60];\n(\n  node({around})[public_transport~\"platform|stop_position|stop\"];\n  node({around})[railway~\"station|tram_stop|halt\"];\n  node({around})[highway=bus_stop];\n);\nout ids;"
        );

        let elements = self.overpass.query(&query).await?;
        let stops_count = elements.iter().filter(|e| e.kind == "node").count();

        Ok(TransitAccess {
            score: density_exp_score(stops_count, f64::from(RADIUS_M), ALPHA),
            stops_count,
            source: SOURCE.to_string(),
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

    #[tokio::test]
    async fn counts_stop_nodes() {
        let server = MockServer::start_async().await;
        let elements: Vec<_> = (0..40).map(|id| json!({"type": "node", "id": id})).collect();
        let mock = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({ "elements": elements }));
            })
            .await;

        let overpass = Arc::new(OverpassClient::new(
            Client::new(),
            fast_config(vec![server.url("/i")]),
        ));
        let client = TransitClient::new(overpass, 60, 100);
        let coords = Coordinates::new(29.75, -95.36);
        let result = client.transit_access(coords).await.unwrap();
        client.transit_access(coords).await.unwrap();

        assert_eq!(result.stops_count, 40);
        assert_eq!(result.score, 71);
        assert_eq!(result.source, SOURCE);
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn no_stops_scores_zero() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({"elements": []}));
            })
            .await;

        let overpass = Arc::new(OverpassClient::new(
            Client::new(),
            fast_config(vec![server.url("/i")]),
        ));
        let result = TransitClient::new(overpass, 60, 100)
            .transit_access(Coordinates::new(31.0, -100.0))
            .await
            .unwrap();
        assert_eq!(result.stops_count, 0);
        assert_eq!(result.score, 0);
    }
}
