use crate::config::UpstreamConfig;
use crate::utils::error::{GreenScoreError, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// One pooled client shared by every upstream adapter.
pub fn build_client(upstream: &UpstreamConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(upstream.user_agent.as_str())
        .timeout(Duration::from_secs(upstream.timeout_s.max(1)))
        .build()?;
    Ok(client)
}

/// Fail with `<service> returned <status>: <body>` on non-2xx responses.
pub async fn ensure_success(service: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!("{} responded with {}: {}", service, status, body);
    Err(GreenScoreError::upstream(service, status, body))
}

/// 先取完整內容再解析，解析錯誤歸類為 SerializationError
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
