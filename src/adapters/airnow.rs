//! U.S. EPA AirNow current observations by ZIP code.

use crate::adapters::http::{ensure_success, read_json};
use crate::adapters::{json_f64, json_string};
use crate::core::scoring::aqi_to_score;
use crate::domain::{AirObservation, AirQuality, ZipCode};
use crate::utils::error::{GreenScoreError, Result};
use crate::utils::ttl_cache::TtlCache;
use reqwest::Client;
use serde_json::Value;

pub const SOURCE: &str = "AirNow";

pub struct AirNowClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    distance_miles: u32,
    cache: TtlCache<AirQuality>,
}

impl AirNowClient {
    pub fn new(
        client: Client,
        url: String,
        api_key: Option<String>,
        distance_miles: u32,
        ttl_seconds: u64,
        max_entries: u64,
    ) -> Self {
        Self {
            client,
            url,
            api_key,
            distance_miles,
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    pub async fn air_quality(&self, zip: &ZipCode) -> Result<AirQuality> {
        self.cache
            .get_or_try_insert(zip.to_string(), || self.fetch(zip))
            .await
    }

    async fn fetch(&self, zip: &ZipCode) -> Result<AirQuality> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GreenScoreError::MissingConfigError {
                field: "AIRNOW_API_KEY".to_string(),
            })?;

        let distance = self.distance_miles.to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("format", "application/json"),
                ("zipCode", zip.as_str()),
                ("distance", distance.as_str()),
                ("API_KEY", api_key),
            ])
            .send()
            .await?;
        let response = ensure_success("AirNow API", response).await?;
        let records: Value = read_json(response).await?;

        match records.as_array() {
            Some(records) if !records.is_empty() => summarize(records),
            _ => Err(GreenScoreError::no_data(
                "No air quality data found for this ZIP code",
            )),
        }
    }
}

fn category_name(record: &Value) -> Option<String> {
    match record.get("Category") {
        Some(Value::Object(category)) => json_string(category.get("Name")),
        Some(Value::Array(categories)) => categories
            .first()
            .and_then(|c| json_string(c.get("Name"))),
        _ => json_string(record.get("Category.Name")),
    }
}

/// 取所有觀測中最高的 AQI 作為評分依據
fn summarize(records: &[Value]) -> Result<AirQuality> {
    let mut max_aqi: Option<f64> = None;
    let mut primary_pollutant: Option<String> = None;
    let mut observations = Vec::with_capacity(records.len());

    for record in records {
        let aqi = json_f64(record.get("AQI"));
        let parameter =
            json_string(record.get("ParameterName")).or_else(|| json_string(record.get("Parameter")));

        if let Some(value) = aqi {
            if max_aqi.map_or(true, |current| value > current) {
                max_aqi = Some(value);
                primary_pollutant = parameter.clone();
            }
        }

        observations.push(AirObservation {
            parameter,
            aqi,
            category: category_name(record),
            reporting_area: json_string(record.get("ReportingArea")),
            state_code: json_string(record.get("StateCode")),
            latitude: json_f64(record.get("Latitude")),
            longitude: json_f64(record.get("Longitude")),
            date_observed: json_string(record.get("DateObserved")).map(|d| d.trim().to_string()),
            hour_observed: record.get("HourObserved").and_then(Value::as_i64),
        });
    }

    let max_aqi = max_aqi
        .ok_or_else(|| GreenScoreError::no_data("No valid AQI values returned by AirNow API"))?;

    Ok(AirQuality {
        score: aqi_to_score(max_aqi),
        max_aqi,
        primary_pollutant,
        observations,
        source: SOURCE.to_string(),
    })
}
