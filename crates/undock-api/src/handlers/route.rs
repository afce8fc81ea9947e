//! /v1/{*path} — requests carried to whichever peer hosts the service.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use bytes::Bytes;

use undock_core::wire::SERVICE_HEADER;
use undock_services::RouteError;

use super::ApiState;

pub async fn handle_route(
    State(state): State<ApiState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, (StatusCode, String)> {
    let target = strip_api_prefix(&uri)?;
    let hint = headers
        .get(SERVICE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut builder = http::Request::builder().method(method).uri(target);
    if let Some(h) = builder.headers_mut() {
        *h = headers;
    }
    let req = builder
        .body(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let resp = state
        .router
        .route(&remote.to_string(), hint.as_deref(), req)
        .await
        .map_err(|e| (status_for(&e), e.to_string()))?;

    let (parts, body) = resp.into_parts();
    Ok(Response::from_parts(parts, Body::from(body)))
}

fn status_for(e: &RouteError) -> StatusCode {
    match e {
        RouteError::AccessDenied => StatusCode::FORBIDDEN,
        RouteError::NoPeerAvailable => StatusCode::SERVICE_UNAVAILABLE,
        RouteError::ForwardFailure { .. } => StatusCode::BAD_GATEWAY,
    }
}

/// `/v1/api/generate?x=1` → `/api/generate?x=1`.
fn strip_api_prefix(uri: &Uri) -> Result<Uri, (StatusCode, String)> {
    let pq = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let rest = pq.strip_prefix("/v1").unwrap_or(pq);
    let rest = if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    };
    rest.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid request target".to_string()))
}
