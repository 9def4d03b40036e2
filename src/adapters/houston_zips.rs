//! Houston ZIP discovery for cache prewarming.

use crate::adapters::http::{ensure_success, read_json};
use crate::domain::ZipCode;
use crate::utils::error::Result;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeSet;

/// 77002..77099，不含 77052、77097
pub fn fallback_zips() -> Vec<ZipCode> {
    (77002..=77099)
        .filter(|z| *z != 77052 && *z != 77097)
        .filter_map(|z| ZipCode::parse(&z.to_string()))
        .collect()
}

pub struct HoustonZipSource {
    client: Client,
    url: String,
}

impl HoustonZipSource {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }

    /// Sorted, de-duplicated ZIPs; the static list is used when discovery
    /// fails or yields nothing.
    pub async fn discover(&self, include_po_boxes: bool) -> Vec<ZipCode> {
        match self.fetch(include_po_boxes).await {
            Ok(zips) if !zips.is_empty() => zips,
            Ok(_) => {
                tracing::warn!("⚠️ ZIP discovery returned nothing, using fallback list");
                filtered(fallback_zips(), include_po_boxes)
            }
            Err(e) => {
                tracing::warn!("⚠️ ZIP discovery failed ({}), using fallback list", e);
                filtered(fallback_zips(), include_po_boxes)
            }
        }
    }

    async fn fetch(&self, include_po_boxes: bool) -> Result<Vec<ZipCode>> {
        let response = self.client.get(&self.url).send().await?;
        let response = ensure_success("Zippopotam", response).await?;
        let body: Value = read_json(response).await?;

        let zips: BTreeSet<ZipCode> = body
            .get("places")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|place| {
                ["post code", "post_code", "post-code"]
                    .iter()
                    .find_map(|key| place.get(*key).and_then(Value::as_str))
            })
            .filter_map(ZipCode::parse)
            .collect();

        Ok(filtered(zips.into_iter().collect(), include_po_boxes))
    }
}

fn filtered(zips: Vec<ZipCode>, include_po_boxes: bool) -> Vec<ZipCode> {
    zips.into_iter()
        .filter(|z| include_po_boxes || !z.is_po_box())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn fallback_list_skips_unassigned_codes() {
        let zips = fallback_zips();
        assert_eq!(zips.len(), 96);
        assert_eq!(zips.first().map(ZipCode::as_str), Some("77002"));
        assert_eq!(zips.last().map(ZipCode::as_str), Some("77099"));
        assert!(!zips.iter().any(|z| z.as_str() == "77052" || z.as_str() == "77097"));
    }

    #[tokio::test]
    async fn discovered_zips_are_sorted_and_exclude_po_boxes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/us/tx/houston");
                then.status(200).json_body(json!({"places": [
                    {"post code": "77005"},
                    {"post code": "77201"},
                    {"post code": "77002"},
                    {"post code": "77002"},
                    {"post code": "7700"}
                ]}));
            })
            .await;

        let source = HoustonZipSource::new(Client::new(), server.url("/us/tx/houston"));
        let zips: Vec<String> = source
            .discover(false)
            .await
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(zips, vec!["77002", "77005"]);

        let with_po: Vec<String> = source
            .discover(true)
            .await
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(with_po, vec!["77002", "77005", "77201"]);
    }

    #[tokio::test]
    async fn failure_uses_fallback() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(500);
            })
            .await;

        let source = HoustonZipSource::new(Client::new(), server.url("/us/tx/houston"));
        assert_eq!(source.discover(false).await.len(), 96);
    }
}
