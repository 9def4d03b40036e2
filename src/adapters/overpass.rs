//! Paced, hedged Overpass API client shared by every OSM-backed metric.
//!
//! Public Overpass mirrors throttle aggressively. All calls go through one
//! gate that keeps a minimum interval between call starts, each attempt
//! races the first few mirrors and the whole attempt is retried with a
//! capped exponential backoff.

use crate::adapters::http::{ensure_success, read_json};
use crate::config::OverpassConfig;
use crate::utils::error::{GreenScoreError, Result};
use futures::future::select_ok;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

const BACKOFF_FACTOR: f64 = 1.8;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// One `elements[]` entry of an `[out:json]` response.
#[derive(Debug, Clone, Deserialize)]
pub struct OverpassElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// 由 `out center` 提供
    pub center: Option<LatLon>,
    /// 由 `out geom` 提供，缺漏節點為 null
    #[serde(default)]
    pub geometry: Vec<Option<LatLon>>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl OverpassElement {
    /// Node position, or the `out center` centroid of a way/relation.
    pub fn position(&self) -> Option<LatLon> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(LatLon { lat, lon }),
            _ => self.center,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
    remark: Option<String>,
}

pub struct OverpassClient {
    client: Client,
    config: OverpassConfig,
    last_call: Mutex<Option<Instant>>,
}

impl OverpassClient {
    pub fn new(client: Client, config: OverpassConfig) -> Self {
        Self {
            client,
            config,
            last_call: Mutex::new(None),
        }
    }

    /// Server-side `[timeout:N]` to embed in queries.
    pub fn query_timeout_s(&self) -> u64 {
        self.config.query_timeout_s
    }

    pub async fn query(&self, query: &str) -> Result<Vec<OverpassElement>> {
        let mirrors: Vec<&str> = self
            .config
            .mirrors
            .iter()
            .map(String::as_str)
            .filter(|m| !m.is_empty())
            .take(self.config.hedge_mirrors.max(1))
            .collect();
        if mirrors.is_empty() {
            return Err(GreenScoreError::ConfigError {
                message: "No Overpass mirrors configured".to_string(),
            });
        }

        let attempts = self.config.max_retries.max(1);
        let attempt_timeout = Duration::from_secs(self.config.attempt_timeout_s.max(1));
        let mut backoff = self.config.backoff_start_s.max(0.0);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let racers = mirrors
                .iter()
                .map(|url| Box::pin(self.paced_call(url, query)));

            match timeout(attempt_timeout, select_ok(racers)).await {
                Ok(Ok((elements, _))) => return Ok(elements),
                // 查詢語法錯誤等非暫時性錯誤，重試無意義
                Ok(Err(e)) if !e.is_retryable() => return Err(e),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "no mirror answered within {}s",
                        attempt_timeout.as_secs()
                    )
                }
            }

            tracing::warn!(
                "⚠️ Overpass attempt {}/{} failed: {}",
                attempt,
                attempts,
                last_error
            );
            if attempt < attempts {
                sleep(Duration::from_secs_f64(backoff)).await;
                backoff = (backoff * BACKOFF_FACTOR).min(self.config.backoff_max_s);
            }
        }

        Err(GreenScoreError::OverpassError {
            message: format!("mirrors failed after {} attempts: {}", attempts, last_error),
        })
    }

    /// 等待至距上次呼叫開始至少 min_interval
    async fn wait_turn(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + self.config.min_interval();
            if ready_at > Instant::now() {
                sleep(ready_at - Instant::now()).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    async fn paced_call(&self, url: &str, query: &str) -> Result<Vec<OverpassElement>> {
        self.wait_turn().await;
        tracing::debug!("Overpass query → {}", url);

        let response = self
            .client
            .post(url)
            .timeout(Duration::from_secs(self.config.attempt_timeout_s.max(1)))
            .form(&[("data", query)])
            .send()
            .await?;
        let response = ensure_success("Overpass API", response).await?;
        let body: OverpassResponse = read_json(response).await?;

        // runtime error 時伺服器仍回 200，只留下 remark
        if body.elements.is_empty() {
            if let Some(remark) = body.remark.filter(|r| r.contains("error")) {
                return Err(GreenScoreError::OverpassError { message: remark });
            }
        }
        Ok(body.elements)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    pub(crate) fn fast_config(mirrors: Vec<String>) -> OverpassConfig {
        OverpassConfig {
            mirrors,
            min_interval_s: 0.0,
            max_retries: 2,
            backoff_start_s: 0.01,
            backoff_max_s: 0.05,
            hedge_mirrors: 2,
            query_timeout_s: 25,
            attempt_timeout_s: 5,
        }
    }

    #[tokio::test]
    async fn first_successful_mirror_wins() {
        let down = MockServer::start_async().await;
        let up = MockServer::start_async().await;
        down.mock_async(|when, then| {
            when.method(POST).path("/api/interpreter");
            then.status(429).body("rate limited");
        })
        .await;
        let ok = up
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/interpreter")
                    .body_contains("data=");
                then.status(200).json_body(json!({
                    "elements": [
                        {"type": "node", "id": 1, "lat": 29.7, "lon": -95.3, "tags": {"highway": "bus_stop"}},
                        {"type": "way", "id": 2, "center": {"lat": 29.8, "lon": -95.4}}
                    ]
                }));
            })
            .await;

        let client = OverpassClient::new(
            Client::new(),
            fast_config(vec![
                down.url("/api/interpreter"),
                up.url("/api/interpreter"),
            ]),
        );
        let elements = client.query("[out:json];node(1);out;").await.unwrap();

        ok.assert_hits_async(1).await;
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].tag("highway"), Some("bus_stop"));
        assert_eq!(elements[1].position(), Some(LatLon { lat: 29.8, lon: -95.4 }));
    }

    #[tokio::test]
    async fn only_hedged_mirrors_are_contacted() {
        let first = MockServer::start_async().await;
        let second = MockServer::start_async().await;
        let first_mock = first
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({"elements": []}));
            })
            .await;
        let second_mock = second
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({"elements": []}));
            })
            .await;

        let mut config = fast_config(vec![first.url("/i"), second.url("/i")]);
        config.hedge_mirrors = 1;
        let client = OverpassClient::new(Client::new(), config);
        assert!(client.query("q").await.unwrap().is_empty());

        first_mock.assert_hits_async(1).await;
        second_mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(504).body("gateway timeout");
            })
            .await;

        let mut config = fast_config(vec![server.url("/i")]);
        config.max_retries = 3;
        let client = OverpassClient::new(Client::new(), config);
        let err = client.query("q").await.unwrap_err();

        assert!(matches!(err, GreenScoreError::OverpassError { .. }));
        assert!(err.to_string().contains("after 3 attempts"));
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn bad_query_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(400).body("parse error");
            })
            .await;

        let mut config = fast_config(vec![server.url("/i")]);
        config.max_retries = 3;
        let err = OverpassClient::new(Client::new(), config)
            .query("q")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Overpass API returned 400: parse error");
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn runtime_error_remark_is_a_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({
                    "elements": [],
                    "remark": "runtime error: Query timed out in \"query\" at line 3"
                }));
            })
            .await;

        let mut config = fast_config(vec![server.url("/i")]);
        config.max_retries = 1;
        let err = OverpassClient::new(Client::new(), config)
            .query("q")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("runtime error"));
    }

    #[tokio::test]
    async fn calls_are_spaced_by_min_interval() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({"elements": []}));
            })
            .await;

        let mut config = fast_config(vec![server.url("/i")]);
        config.min_interval_s = 0.3;
        let client = OverpassClient::new(Client::new(), config);

        let started = std::time::Instant::now();
        client.query("a").await.unwrap();
        client.query("b").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
