use crate::app::state::AppState;
use crate::core::Located;
use crate::domain::{ErrorBody, ZipCode};
use crate::utils::error::{GreenScoreError, Result};
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Debug, Deserialize)]
pub struct ZipQuery {
    zip: Option<String>,
}

impl ZipQuery {
    fn require(self) -> std::result::Result<String, Response> {
        self.zip.ok_or_else(|| {
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"detail": "Missing required query parameter: zip"})),
            )
                .into_response()
        })
    }
}

/// Upstream failure that prevented geocoding; metric failures never get here.
pub struct ApiError(GreenScoreError);

impl From<GreenScoreError> for ApiError {
    fn from(e: GreenScoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GreenScoreError::HttpError(_)
            | GreenScoreError::UpstreamError { .. }
            | GreenScoreError::SerializationError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!("❌ Request failed ({}): {}", status, self.0);
        (status, Json(json!({"detail": self.0.to_string()}))).into_response()
    }
}

/// Recursively sort object keys so the hash does not depend on field order.
pub fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical_json(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// SHA-256 hex of the compact, key-sorted JSON.
pub fn etag_for(report: &Value) -> Result<String> {
    let canonical = serde_json::to_vec(&canonical_json(report))?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

fn cache_headers(etag: &str, max_age: u64, hit: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(etag) {
        headers.insert(ETAG, v);
    }
    if let Ok(v) = HeaderValue::from_str(&format!("public, max-age={}", max_age)) {
        headers.insert(CACHE_CONTROL, v);
    }
    headers.insert(
        X_CACHE,
        HeaderValue::from_static(if hit { "HIT" } else { "MISS" }),
    );
    headers
}

fn etag_matches(request: &HeaderMap, etag: &str) -> bool {
    request
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|tag| tag.trim().trim_matches('"') == etag))
        .unwrap_or(false)
}

fn located_json<T: Serialize>(result: Result<Located<T>>) -> Response {
    match result {
        Ok(Located::Found(report)) => Json(report).into_response(),
        Ok(Located::InvalidZip) => Json(ErrorBody::invalid_zip()).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

pub async fn green_score(
    State(state): State<AppState>,
    Query(query): Query<ZipQuery>,
    headers: HeaderMap,
) -> Response {
    let raw = match query.require() {
        Ok(raw) => raw,
        Err(rejection) => return rejection,
    };

    let zip = ZipCode::parse(&raw);
    if let Some(zip) = &zip {
        match state.cache.get(zip).await {
            Ok(Some(cached)) => return cached_response(&state, &headers, zip, cached).await,
            Ok(None) => {}
            Err(e) => tracing::warn!("⚠️ Cache read failed for {}: {}", zip, e),
        }
    }

    let report = match state.engine.green_score(&raw).await {
        Ok(Located::Found(report)) => report,
        Ok(Located::InvalidZip) => return Json(ErrorBody::invalid_zip()).into_response(),
        Err(e) => return ApiError(e).into_response(),
    };

    let value = match serde_json::to_value(&report) {
        Ok(value) => value,
        Err(e) => return ApiError(e.into()).into_response(),
    };
    if let Err(e) = state.cache.set(&report.zip, &value).await {
        tracing::warn!("⚠️ Could not cache report for {}: {}", report.zip, e);
    }

    match etag_for(&value) {
        Ok(etag) => (
            cache_headers(&etag, state.max_age_seconds, false),
            Json(value),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn cached_response(
    state: &AppState,
    request: &HeaderMap,
    zip: &ZipCode,
    cached: Value,
) -> Response {
    let etag = match etag_for(&cached) {
        Ok(etag) => etag,
        Err(e) => return ApiError(e).into_response(),
    };
    match state.cache.ttl(zip).await {
        Ok(Some(ttl)) => tracing::debug!("Cache hit for {} (expires in {}s)", zip, ttl),
        Ok(None) => tracing::debug!("Cache hit for {} (no expiry)", zip),
        Err(e) => tracing::debug!("Cache hit for {} (ttl unavailable: {})", zip, e),
    }
    let headers = cache_headers(&etag, state.max_age_seconds, true);
    if etag_matches(request, &etag) {
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }
    (headers, Json(cached)).into_response()
}

pub async fn sea_level(State(state): State<AppState>, Query(query): Query<ZipQuery>) -> Response {
    match query.require() {
        Ok(zip) => located_json(state.engine.sea_level(&zip).await),
        Err(rejection) => rejection,
    }
}

pub async fn transit_access(
    State(state): State<AppState>,
    Query(query): Query<ZipQuery>,
) -> Response {
    match query.require() {
        Ok(zip) => located_json(state.engine.transit_access(&zip).await),
        Err(rejection) => rejection,
    }
}

pub async fn water(State(state): State<AppState>, Query(query): Query<ZipQuery>) -> Response {
    match query.require() {
        Ok(zip) => located_json(state.engine.water(&zip).await),
        Err(rejection) => rejection,
    }
}

pub async fn flood_risk(State(state): State<AppState>, Query(query): Query<ZipQuery>) -> Response {
    match query.require() {
        Ok(zip) => located_json(state.engine.flood_risk(&zip).await),
        Err(rejection) => rejection,
    }
}

pub async fn pm25(State(state): State<AppState>, Query(query): Query<ZipQuery>) -> Response {
    match query.require() {
        Ok(zip) => located_json(state.engine.pm25(&zip).await),
        Err(rejection) => rejection,
    }
}

pub async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
