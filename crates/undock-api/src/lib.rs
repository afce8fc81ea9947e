pub mod handlers;

use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// Largest request body accepted for forwarding.
pub const MAX_ROUTED_BODY: usize = undock_services::overlay::MAX_MESSAGE_BYTES;

/// The full HTTP surface. Named routes win over the routed wildcard.
pub fn app(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/stats", get(handlers::handle_stats))
        .route("/v1/ban", post(handlers::handle_ban))
        .route("/v1/bans", get(handlers::handle_bans))
        .route("/v1/peers", get(handlers::handle_peers))
        .route("/v1/endpoints", get(handlers::handle_endpoints))
        .route("/v1/sessions", get(handlers::handle_sessions))
        .route("/v1/status", get(handlers::handle_status))
        .route("/v1/announce", post(handlers::handle_announce))
        .route(
            "/v1/{*path}",
            any(handlers::handle_route).layer(DefaultBodyLimit::max(MAX_ROUTED_BODY)),
        )
        .with_state(state)
        .layer(cors)
}

pub async fn serve(
    state: ApiState,
    bind: &str,
    port: u16,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let ip: IpAddr = bind
        .parse()
        .with_context(|| format!("invalid API bind address {bind}"))?;
    let listener = TcpListener::bind(SocketAddr::new(ip, port))
        .await
        .with_context(|| format!("failed to bind API on {bind}:{port}"))?;
    serve_on(listener, state, shutdown).await
}

/// Serve on an already-bound listener until `shutdown` fires.
pub async fn serve_on(
    listener: TcpListener,
    state: ApiState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "API listening");
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    })
    .await?;
    Ok(())
}
