use crate::app::handlers;
use crate::app::state::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;

pub fn build_router(state: AppState) -> Router {
    // 只有完整報告會觸發大量上游請求，其餘端點不限流
    let limited = Router::new()
        .route("/green-score", get(handlers::green_score))
        .route_layer(from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .merge(limited)
        .route("/sea-level", get(handlers::sea_level))
        .route("/transit-access", get(handlers::transit_access))
        .route("/water", get(handlers::water))
        .route("/flood-risk", get(handlers::flood_risk))
        .route("/pm25", get(handlers::pm25))
        .route("/healthz", get(handlers::healthz))
        .layer(from_fn_with_state(state.clone(), cors_middleware))
        .with_state(state)
}

fn header_value(headers: &HeaderMap, key: &str) -> Option<String> {
    let raw = headers.get(key)?.to_str().ok()?.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

/// First hop of `X-Forwarded-For`, else the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    header_value(headers, "x-forwarded-for")
        .and_then(|raw| raw.split(',').next().map(|first| first.trim().to_string()))
        .filter(|first| !first.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn has_zip_param(req: &Request<Body>) -> bool {
    req.uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).any(|(key, _)| key == "zip"))
        .unwrap_or(false)
}

async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // 缺 zip 的請求由 handler 回 422，不佔用配額
    if !has_zip_param(&req) {
        return next.run(req).await;
    }
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_key(req.headers(), peer);
    if !state.limiter.check(&client).await {
        tracing::warn!("⚠️ Rate limit exceeded for {}", client);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"detail": "Rate limit exceeded. Try again later."})),
        )
            .into_response();
    }
    next.run(req).await
}

async fn cors_middleware(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let origin = header_value(req.headers(), "origin").filter(|o| state.origin_allowed(o));

    if req.method() == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        if let Some(origin) = origin {
            allow_origin(&mut resp, &origin);
            resp.headers_mut().insert(
                "access-control-allow-methods",
                HeaderValue::from_static("GET,OPTIONS"),
            );
            let requested = req
                .headers()
                .get("access-control-request-headers")
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("content-type,if-none-match"));
            resp.headers_mut()
                .insert("access-control-allow-headers", requested);
        }
        return resp;
    }

    let mut resp = next.run(req).await;
    if let Some(origin) = origin {
        allow_origin(&mut resp, &origin);
        resp.headers_mut().insert(
            "access-control-expose-headers",
            HeaderValue::from_static("etag,x-cache"),
        );
    }
    resp
}

fn allow_origin(resp: &mut Response, origin: &str) {
    if let Ok(v) = HeaderValue::from_str(origin) {
        resp.headers_mut().insert("access-control-allow-origin", v);
    }
    resp.headers_mut().insert(
        "access-control-allow-credentials",
        HeaderValue::from_static("true"),
    );
    resp.headers_mut()
        .insert("vary", HeaderValue::from_static("Origin"));
}
