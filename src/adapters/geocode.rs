//! ZIP → centroid via OpenStreetMap Nominatim.
//!
//! Nominatim's usage policy asks for light traffic, so lookups are cached
//! for a day.

use crate::adapters::http::{ensure_success, read_json};
use crate::adapters::json_f64;
use crate::domain::{Coordinates, ZipCode};
use crate::utils::error::Result;
use crate::utils::ttl_cache::TtlCache;
use reqwest::Client;
use serde_json::Value;

pub struct Geocoder {
    client: Client,
    url: String,
    cache: TtlCache<Option<Coordinates>>,
}

impl Geocoder {
    pub fn new(client: Client, url: String, ttl_seconds: u64, max_entries: u64) -> Self {
        Self {
            client,
            url,
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    /// `Ok(None)` when Nominatim knows no such postal code.
    pub async fn coordinates(&self, zip: &ZipCode) -> Result<Option<Coordinates>> {
        self.cache
            .get_or_try_insert(zip.to_string(), || self.fetch(zip))
            .await
    }

    async fn fetch(&self, zip: &ZipCode) -> Result<Option<Coordinates>> {
        tracing::debug!("Geocoding ZIP {}", zip);
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("postalcode", zip.as_str()),
                ("country", "USA"),
                ("format", "json"),
            ])
            .send()
            .await?;
        let response = ensure_success("Nominatim", response).await?;
        let places: Vec<Value> = read_json(response).await?;

        let coords = places.first().and_then(|place| {
            let lat = json_f64(place.get("lat"))?;
            let lon = json_f64(place.get("lon"))?;
            Some(Coordinates::new(lat, lon))
        });
        Ok(coords.filter(Coordinates::is_valid))
    }
}
