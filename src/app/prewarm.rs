//! Client side of cache prewarming: call a running server's `/green-score`
//! for a list of ZIPs at a fixed requests-per-minute budget.

use crate::domain::ZipCode;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::time::sleep;

const ERROR_CHARS: usize = 300;

/// One row of the CSV log. `status` is 0 for transport errors and -1 for dry runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrewarmRecord {
    pub zip: String,
    pub status: i32,
    pub ok: bool,
    pub elapsed_s: f64,
    pub error: Option<String>,
}

fn truncate(message: &str) -> String {
    message.chars().take(ERROR_CHARS).collect()
}

fn elapsed_s(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0
}

pub struct PrewarmRunner {
    client: Client,
    base_url: String,
    rpm: usize,
    concurrency: usize,
    batch_interval: Duration,
}

impl PrewarmRunner {
    pub fn new(client: Client, base_url: &str, rpm: usize, concurrency: usize) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rpm: rpm.max(1),
            concurrency: concurrency.max(1),
            batch_interval: Duration::from_secs(60),
        }
    }

    /// Minimum spacing between batch starts (one minute in production).
    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    pub async fn prewarm_one(&self, zip: &ZipCode) -> PrewarmRecord {
        let started = Instant::now();
        let result = self
            .client
            .get(format!("{}/green-score", self.base_url))
            .query(&[("zip", zip.as_str())])
            .timeout(Duration::from_secs(120))
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let ok = status == reqwest::StatusCode::OK;
                let error = if ok {
                    None
                } else {
                    Some(truncate(&response.text().await.unwrap_or_default()))
                };
                PrewarmRecord {
                    zip: zip.to_string(),
                    status: i32::from(status.as_u16()),
                    ok,
                    elapsed_s: elapsed_s(started),
                    error,
                }
            }
            Err(e) => PrewarmRecord {
                zip: zip.to_string(),
                status: 0,
                ok: false,
                elapsed_s: elapsed_s(started),
                error: Some(truncate(&e.to_string())),
            },
        }
    }

    /// Batches of `rpm` ZIPs, each with at most `concurrency` in flight.
    pub async fn run(&self, zips: &[ZipCode], dry_run: bool) -> Vec<PrewarmRecord> {
        let mut records = Vec::with_capacity(zips.len());
        let batches: Vec<&[ZipCode]> = zips.chunks(self.rpm).collect();

        for (index, batch) in batches.iter().enumerate() {
            let listed: Vec<&str> = batch.iter().map(ZipCode::as_str).collect();
            tracing::info!("📦 Batch {}: {:?}", index + 1, listed);
            let batch_started = Instant::now();

            if dry_run {
                records.extend(batch.iter().map(|zip| PrewarmRecord {
                    zip: zip.to_string(),
                    status: -1,
                    ok: true,
                    elapsed_s: 0.0,
                    error: None,
                }));
            } else {
                let mut results = stream::iter(batch.iter())
                    .map(|zip| self.prewarm_one(zip))
                    .buffer_unordered(self.concurrency);
                while let Some(record) = results.next().await {
                    match &record.error {
                        None => tracing::info!("  ✅ {}: OK in {}s", record.zip, record.elapsed_s),
                        Some(error) => tracing::warn!(
                            "  ❌ {}: ERR({}) in {}s - {}",
                            record.zip,
                            record.status,
                            record.elapsed_s,
                            error
                        ),
                    }
                    records.push(record);
                }
            }

            if index + 1 < batches.len() {
                let remaining = self.batch_interval.saturating_sub(batch_started.elapsed());
                if !remaining.is_zero() {
                    tracing::info!("😴 Sleeping {:.1}s to respect rpm", remaining.as_secs_f64());
                    sleep(remaining).await;
                }
            }
        }
        records
    }
}

pub fn log_file_name(finished: DateTime<Utc>) -> String {
    format!("prewarm_houston_log_{}.csv", finished.format("%Y%m%d_%H%M%S"))
}

/// Write the records sorted by ZIP; returns the file path.
pub fn write_log(
    dir: &Path,
    records: &[PrewarmRecord],
    finished: DateTime<Utc>,
) -> Result<PathBuf> {
    let path = dir.join(log_file_name(finished));
    let mut sorted: Vec<&PrewarmRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.zip.cmp(&b.zip));

    let mut writer = csv::Writer::from_path(&path)?;
    for record in sorted {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    fn zips(raw: &[&str]) -> Vec<ZipCode> {
        raw.iter().filter_map(|z| ZipCode::parse(z)).collect()
    }

    #[tokio::test]
    async fn records_status_for_each_zip() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/green-score").query_param("zip", "77002");
                then.status(200).json_body(serde_json::json!({"overall_score": 61}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/green-score").query_param("zip", "77003");
                then.status(429)
                    .body(r#"{"detail":"Rate limit exceeded. Try again later."}"#);
            })
            .await;

        let runner = PrewarmRunner::new(Client::new(), &server.base_url(), 1, 1)
            .with_batch_interval(Duration::from_millis(10));
        let mut records = runner.run(&zips(&["77002", "77003"]), false).await;
        records.sort_by(|a, b| a.zip.cmp(&b.zip));

        assert!(records[0].ok);
        assert_eq!(records[0].status, 200);
        assert_eq!(records[0].error, None);
        assert!(!records[1].ok);
        assert_eq!(records[1].status, 429);
        assert!(records[1].error.as_deref().unwrap().contains("Rate limit"));
    }

    #[tokio::test]
    async fn dry_run_makes_no_requests() {
        let runner = PrewarmRunner::new(Client::new(), "http://127.0.0.1:9", 6, 2)
            .with_batch_interval(Duration::ZERO);
        let records = runner.run(&zips(&["77005", "77004"]), true).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.ok && r.status == -1));
    }

    #[test]
    fn log_is_sorted_by_zip() {
        let dir = TempDir::new().unwrap();
        let finished = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 5).unwrap();
        let records = vec![
            PrewarmRecord {
                zip: "77099".to_string(),
                status: 0,
                ok: false,
                elapsed_s: 1.5,
                error: Some("timed out".to_string()),
            },
            PrewarmRecord {
                zip: "77002".to_string(),
                status: 200,
                ok: true,
                elapsed_s: 12.25,
                error: None,
            },
        ];

        let path = write_log(dir.path(), &records, finished).unwrap();
        assert!(path.ends_with("prewarm_houston_log_20240601_123005.csv"));
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            content,
            "zip,status,ok,elapsed_s,error\n77002,200,true,12.25,\n77099,0,false,1.5,timed out\n"
        );
    }
}
