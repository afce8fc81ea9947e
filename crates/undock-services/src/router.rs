//! Router — carries local HTTP requests to the peer hosting the service and
//! serves requests other peers carry to us.
//!
//! Ingress (`route`), per request:
//!   1. refuse banned callers, before any bookkeeping
//!   2. open a session that ends however the request ends
//!   3. pick the least-loaded endpoint
//!   4. forward over a fresh overlay stream: write request, finish, read reply
//!   5. attribute the outcome to the selected service
//!
//! Egress (`StreamHandler`): read one request from the stream, run it
//! against the local workload, write the response back. Anything that goes
//! wrong drops the stream unanswered; the caller sees a failed read.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, Request, Response};
use tokio::sync::Semaphore;

use undock_core::wire::{ROUTER_PROTOCOL_ID, SERVICE_HEADER};
use undock_core::PeerId;

use crate::bans::BanList;
use crate::codec::{self, CodecError};
use crate::dispatch::LocalDispatcher;
use crate::load::LoadGauge;
use crate::overlay::{BoxStream, Overlay, OverlayError, StreamHandler, MAX_MESSAGE_BYTES};
use crate::peer::{PeerRegistry, ServiceEndpoint};
use crate::session::SessionTracker;
use crate::stats::StatsLedger;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("access denied")]
    AccessDenied,
    #[error("no peer available")]
    NoPeerAvailable,
    #[error("forward to {peer} failed: {source}")]
    ForwardFailure {
        service: String,
        peer: String,
        #[source]
        source: ForwardError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("service id is not a valid header value")]
    InvalidServiceId,
    #[error(transparent)]
    Overlay(#[from] OverlayError),
    #[error("bad response: {0}")]
    Codec(#[from] CodecError),
}

/// Shared by the HTTP front end and the overlay handler. Clones share state.
#[derive(Clone)]
pub struct Router {
    overlay: Arc<dyn Overlay>,
    registry: PeerRegistry,
    stats: StatsLedger,
    bans: BanList,
    sessions: SessionTracker,
    dispatcher: Arc<dyn LocalDispatcher>,
    serving: LoadGauge,
    limiter: Option<Arc<Semaphore>>,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        overlay: Arc<dyn Overlay>,
        registry: PeerRegistry,
        stats: StatsLedger,
        bans: BanList,
        sessions: SessionTracker,
        dispatcher: Arc<dyn LocalDispatcher>,
        serving: LoadGauge,
    ) -> Self {
        Self {
            overlay,
            registry,
            stats,
            bans,
            sessions,
            dispatcher,
            serving,
            limiter: None,
        }
    }

    /// Cap concurrent forwards; requests over the cap wait their turn.
    /// 0 leaves forwarding unbounded.
    pub fn with_max_concurrent_forwards(mut self, max: usize) -> Self {
        self.limiter = (max > 0).then(|| Arc::new(Semaphore::new(max)));
        self
    }

    pub fn local_id(&self) -> PeerId {
        self.overlay.local_id()
    }

    /// Route one request from a local caller.
    ///
    /// `service_hint` narrows selection to one service; without it the
    /// least-loaded endpoint of any service is used.
    pub async fn route(
        &self,
        remote_addr: &str,
        service_hint: Option<&str>,
        mut req: Request<Bytes>,
    ) -> Result<Response<Bytes>, RouteError> {
        if self.bans.is_banned(remote_addr) {
            tracing::debug!(remote = remote_addr, "banned caller refused");
            return Err(RouteError::AccessDenied);
        }

        let session = self.sessions.guard(remote_addr);

        let _permit = match &self.limiter {
            Some(limiter) => Some(
                limiter
                    .acquire()
                    .await
                    .map_err(|_| RouteError::NoPeerAvailable)?,
            ),
            None => None,
        };

        let target = match service_hint {
            Some(service) => self.registry.select_for_service(service),
            None => self.registry.select_least_loaded(),
        }
        .map_err(|_| RouteError::NoPeerAvailable)?;
        session.touch();

        match self.forward(&target, &mut req).await {
            Ok(resp) => {
                let bytes = resp.body().len() as u64;
                self.stats.record_request(&target.service_id, bytes);
                tracing::debug!(
                    session = session.id(),
                    service = %target.service_id,
                    peer = %target.peer_id.short(),
                    status = resp.status().as_u16(),
                    bytes,
                    "request routed"
                );
                Ok(resp)
            }
            Err(e) => {
                self.stats.record_error(&target.service_id);
                tracing::warn!(
                    session = session.id(),
                    service = %target.service_id,
                    peer = %target.peer_id.short(),
                    error = %e,
                    "forward failed"
                );
                Err(RouteError::ForwardFailure {
                    service: target.service_id,
                    peer: target.peer_id.short(),
                    source: e,
                })
            }
        }
    }

    async fn forward(
        &self,
        target: &ServiceEndpoint,
        req: &mut Request<Bytes>,
    ) -> Result<Response<Bytes>, ForwardError> {
        let service = HeaderValue::from_str(&target.service_id)
            .map_err(|_| ForwardError::InvalidServiceId)?;
        req.headers_mut().insert(SERVICE_HEADER, service);
        let wire = codec::encode_request(req);
        let method = req.method().clone();

        // The stream is dropped, and so closed, on every return path.
        let mut stream = self
            .overlay
            .open_stream(target.peer_id, ROUTER_PROTOCOL_ID)
            .await?;
        stream.write_all(&wire).await?;
        stream.finish().await?;
        let raw = stream.read_to_end(MAX_MESSAGE_BYTES).await?;
        Ok(codec::decode_response(&raw, &method)?)
    }

    async fn serve_stream(&self, stream: &mut BoxStream) -> Result<(), String> {
        let raw = stream
            .read_to_end(MAX_MESSAGE_BYTES)
            .await
            .map_err(|e| format!("read: {e}"))?;
        let req = codec::decode_request(&raw).map_err(|e| format!("decode: {e}"))?;
        let service = req
            .headers()
            .get(SERVICE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| "missing service header".to_string())?;
        let method = req.method().clone();

        let resp = self
            .dispatcher
            .dispatch(&service, req)
            .await
            .map_err(|e| format!("dispatch {service}: {e}"))?;

        stream
            .write_all(&codec::encode_response(&resp, &method))
            .await
            .map_err(|e| format!("write: {e}"))?;
        stream.finish().await.map_err(|e| format!("finish: {e}"))?;
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for Router {
    async fn handle(&self, mut stream: BoxStream) {
        let _ticket = self.serving.enter();
        let remote = stream.remote();
        if let Err(reason) = self.serve_stream(&mut stream).await {
            tracing::debug!(peer = %remote.short(), reason = %reason, "inbound stream dropped");
        }
    }
}
