//! Local dispatcher — replays a forwarded request against a workload hosted
//! on this node.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST};
use http::{Request, Response};

use crate::inventory::ServiceInventory;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("service {0} is not hosted here")]
    UnknownService(String),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("invalid upstream response: {0}")]
    Http(#[from] http::Error),
}

#[async_trait]
pub trait LocalDispatcher: Send + Sync {
    /// Execute `req` against the local workload serving `service_id`.
    async fn dispatch(
        &self,
        service_id: &str,
        req: Request<Bytes>,
    ) -> Result<Response<Bytes>, DispatchError>;
}

/// Dispatches over loopback HTTP to the port the inventory lists for the
/// service.
pub struct HttpDispatcher {
    client: reqwest::Client,
    inventory: Arc<dyn ServiceInventory>,
    host: String,
}

impl HttpDispatcher {
    pub fn new(inventory: Arc<dyn ServiceInventory>) -> Result<Self, DispatchError> {
        Self::with_host(inventory, "127.0.0.1")
    }

    pub fn with_host(inventory: Arc<dyn ServiceInventory>, host: &str) -> Result<Self, DispatchError> {
        // Loopback traffic must never be sent through a system proxy.
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            client,
            inventory,
            host: host.to_string(),
        })
    }
}

#[async_trait]
impl LocalDispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        service_id: &str,
        req: Request<Bytes>,
    ) -> Result<Response<Bytes>, DispatchError> {
        let service = self
            .inventory
            .find(service_id)
            .ok_or_else(|| DispatchError::UnknownService(service_id.to_string()))?;

        let (parts, body) = req.into_parts();
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("http://{}:{}{}", self.host, service.port, target);

        let mut headers = parts.headers;
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);

        tracing::debug!(service = service_id, method = %parts.method, url = %url, "dispatching locally");
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let mut builder = Response::builder().status(upstream.status());
        if let Some(h) = builder.headers_mut() {
            h.extend(upstream.headers().clone());
        }
        let body = upstream.bytes().await?;
        Ok(builder.body(body)?)
    }
}
