//! PM2.5 from OpenAQ v3: nearby locations, their PM2.5 sensors, and an
//! inverse-distance weighted average of the latest readings.

use crate::adapters::http::{ensure_success, read_json};
use crate::adapters::round_to;
use crate::core::scoring::{haversine_km, normalize_pm25};
use crate::domain::{Coordinates, Pm25, Pm25Station, StationCoordinates};
use crate::utils::error::{GreenScoreError, Result};
use crate::utils::ttl_cache::TtlCache;
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

const PARAMETER: &str = "pm25";
const LOCATION_LIMIT: u32 = 20;
/// 超出範圍的讀值視為異常
const MAX_PLAUSIBLE: f64 = 500.0;
pub const PM25_SCALE: f64 = 25.0;

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Location {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    coordinates: Option<LatLng>,
    #[serde(default)]
    sensors: Vec<SensorRef>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct SensorRef {
    id: i64,
    parameter: ParameterRef,
}

#[derive(Debug, Deserialize)]
struct ParameterRef {
    name: String,
    #[serde(default)]
    units: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SensorDetail {
    parameter: ParameterRef,
    latest: Option<Latest>,
}

#[derive(Debug, Deserialize)]
struct Latest {
    value: Option<f64>,
    datetime: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
struct Timestamp {
    utc: Option<String>,
}

struct Candidate {
    station: String,
    station_id: i64,
    sensor_id: i64,
    distance_km: f64,
    position: LatLng,
}

pub struct OpenAqClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    radius_m: u32,
    cache: TtlCache<Pm25>,
}

impl OpenAqClient {
    pub fn new(
        client: Client,
        base_url: String,
        api_key: Option<String>,
        radius_m: u32,
        ttl_seconds: u64,
        max_entries: u64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            radius_m,
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    pub async fn pm25(&self, coords: Coordinates) -> Result<Pm25> {
        self.cache
            .get_or_try_insert(coords.cache_key(), || self.fetch(coords))
            .await
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| GreenScoreError::MissingConfigError {
                field: "OPENAQ_API_KEY".to_string(),
            })
    }

    async fn fetch(&self, coords: Coordinates) -> Result<Pm25> {
        let api_key = self.api_key()?;

        let response = self
            .client
            .get(format!("{}/locations", self.base_url))
            .header("x-api-key", api_key)
            .query(&[
                ("coordinates", format!("{},{}", coords.lat, coords.lon)),
                ("radius", self.radius_m.to_string()),
                ("limit", LOCATION_LIMIT.to_string()),
                ("sort", "distance".to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GreenScoreError::no_data(format!(
                "Location lookup failed: {}",
                body
            )));
        }
        let locations: Page<Location> = read_json(response).await?;
        if locations.results.is_empty() {
            return Err(GreenScoreError::no_data("No nearby locations found"));
        }

        let candidates = pm25_sensors(coords, locations.results);
        if candidates.is_empty() {
            return Err(GreenScoreError::no_data(
                "No PM2.5 sensors found within radius",
            ));
        }

        let readings = join_all(
            candidates
                .iter()
                .map(|candidate| self.latest_reading(api_key, candidate)),
        )
        .await;
        let stations: Vec<Pm25Station> = readings
            .into_iter()
            .filter_map(|reading| match reading {
                Ok(station) => station,
                Err(e) => {
                    tracing::debug!("OpenAQ sensor lookup failed: {}", e);
                    None
                }
            })
            .collect();

        summarize(stations)
    }

    /// `Ok(None)` for sensors without a usable latest value.
    async fn latest_reading(&self, api_key: &str, candidate: &Candidate) -> Result<Option<Pm25Station>> {
        let response = self
            .client
            .get(format!("{}/sensors/{}", self.base_url, candidate.sensor_id))
            .header("x-api-key", api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success("OpenAQ", response).await?;
        let page: Page<SensorDetail> = read_json(response).await?;

        let Some(detail) = page.results.into_iter().next() else {
            return Ok(None);
        };
        let Some(latest) = detail.latest else {
            return Ok(None);
        };
        let Some(value) = latest.value.filter(|v| (0.0..=MAX_PLAUSIBLE).contains(v)) else {
            return Ok(None);
        };

        Ok(Some(Pm25Station {
            station: candidate.station.clone(),
            station_id: candidate.station_id,
            sensor_id: candidate.sensor_id,
            value,
            unit: detail.parameter.units.unwrap_or_else(|| "µg/m³".to_string()),
            timestamp: latest.datetime.and_then(|d| d.utc),
            distance_km: round_to(candidate.distance_km, 2),
            station_coordinates: StationCoordinates {
                latitude: candidate.position.latitude,
                longitude: candidate.position.longitude,
            },
        }))
    }
}

fn pm25_sensors(coords: Coordinates, locations: Vec<Location>) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for location in locations {
        let Some(position) = location.coordinates else {
            continue;
        };
        let distance_km = haversine_km(
            coords.lat,
            coords.lon,
            position.latitude,
            position.longitude,
        );
        let station = location.name.clone().unwrap_or_default();
        candidates.extend(
            location
                .sensors
                .iter()
                .filter(|s| s.parameter.name == PARAMETER)
                .map(|s| Candidate {
                    station: station.clone(),
                    station_id: location.id,
                    sensor_id: s.id,
                    distance_km,
                    position,
                }),
        );
    }
    candidates
}

/// 反距離加權，距離加 0.1 km 避免除以零
fn summarize(stations: Vec<Pm25Station>) -> Result<Pm25> {
    if stations.is_empty() {
        return Err(GreenScoreError::no_data(
            "No valid PM2.5 measurements found from any nearby sensor",
        ));
    }

    let (numer, denom) = stations.iter().fold((0.0, 0.0), |(n, d), s| {
        let w = 1.0 / (s.distance_km + 0.1);
        (n + s.value * w, d + w)
    });
    let pm25 = round_to(numer / denom, 2);
    let unit = stations[0].unit.clone();

    Ok(Pm25 {
        score: normalize_pm25(pm25, PM25_SCALE),
        pm25,
        unit,
        num_stations: stations.len(),
        stations_used: stations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn openaq(server: &MockServer, key: Option<&str>) -> OpenAqClient {
        OpenAqClient::new(
            Client::new(),
            server.url("/v3"),
            key.map(str::to_string),
            10_000,
            60,
            100,
        )
    }

    #[tokio::test]
    async fn averages_nearby_pm25_sensors() {
        let server = MockServer::start_async().await;
        let locations = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v3/locations")
                    .header("x-api-key", "k")
                    .query_param("coordinates", "29.75,-95.36")
                    .query_param("sort", "distance");
                then.status(200).json_body(json!({"results": [
                    {
                        "id": 10, "name": "Clinton",
                        "coordinates": {"latitude": 29.75, "longitude": -95.36},
                        "sensors": [
                            {"id": 100, "parameter": {"name": "pm25", "units": "µg/m³"}},
                            {"id": 101, "parameter": {"name": "o3", "units": "ppm"}}
                        ]
                    },
                    {"id": 11, "name": "No coords", "sensors": []}
                ]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/sensors/100");
                then.status(200).json_body(json!({"results": [{
                    "parameter": {"name": "pm25", "units": "µg/m³"},
                    "latest": {"value": 6.25, "datetime": {"utc": "2024-06-01T14:00:00Z"}}
                }]}));
            })
            .await;

        let result = openaq(&server, Some("k"))
            .pm25(Coordinates::new(29.75, -95.36))
            .await
            .unwrap();

        locations.assert_async().await;
        assert_eq!(result.pm25, 6.25);
        assert_eq!(result.score, 50);
        assert_eq!(result.num_stations, 1);
        assert_eq!(result.stations_used[0].station, "Clinton");
        assert_eq!(
            result.stations_used[0].timestamp.as_deref(),
            Some("2024-06-01T14:00:00Z")
        );
    }

    #[tokio::test]
    async fn outliers_and_missing_sensors_are_skipped() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/locations");
                then.status(200).json_body(json!({"results": [{
                    "id": 1, "name": "A",
                    "coordinates": {"latitude": 29.7, "longitude": -95.3},
                    "sensors": [
                        {"id": 1, "parameter": {"name": "pm25"}},
                        {"id": 2, "parameter": {"name": "pm25"}}
                    ]
                }]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/sensors/1");
                then.status(200).json_body(json!({"results": [{
                    "parameter": {"name": "pm25"},
                    "latest": {"value": 999.0}
                }]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/sensors/2");
                then.status(404);
            })
            .await;

        let err = openaq(&server, Some("k"))
            .pm25(Coordinates::new(29.75, -95.36))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "No valid PM2.5 measurements found from any nearby sensor"
        );
    }

    #[tokio::test]
    async fn requires_api_key() {
        let server = MockServer::start_async().await;
        let err = openaq(&server, None)
            .pm25(Coordinates::new(29.75, -95.36))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("OPENAQ_API_KEY"));
    }

    #[test]
    fn inverse_distance_weighting() {
        let station = |value: f64, distance_km: f64| Pm25Station {
            station: "s".to_string(),
            station_id: 1,
            sensor_id: 1,
            value,
            unit: "µg/m³".to_string(),
            timestamp: None,
            distance_km,
            station_coordinates: StationCoordinates {
                latitude: 0.0,
                longitude: 0.0,
            },
        };
        // weights 10 and 1/1.1
        let result = summarize(vec![station(10.0, 0.0), station(20.0, 1.0)]).unwrap();
        assert_eq!(result.pm25, 10.83);
        assert_eq!(result.num_stations, 2);
    }
}
