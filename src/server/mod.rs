//! Reference backend for the tracker.
//!
//! An in-memory implementation of the ingest and aggregation API the
//! tracker talks to:
//! - Website registration issuing per-site API keys, plus updates, key
//!   rotation and soft deletion
//! - Single and batched event ingest with validation
//! - Session engagement rollups and website stats
//! - Event listing, aggregated stats and dashboard analytics
//!
//! # Architecture
//!
//! ```text
//! Tracker ──→ POST /api/v1/events/track/batch ──→ validate ──→ Store
//!                                                               │
//! Dashboard ←── GET /api/v1/events/{events,stats} ←─ aggregate ─┘
//! ```

pub mod handlers;
pub mod store;
pub mod validation;

use axum::{
    http::{header, HeaderName, Method},
    routing::{delete, get, post, put},
    Router,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

pub use store::Store;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: IpAddr,
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration bound to localhost
    pub fn new(port: u16) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }
}

/// Shared server state
#[derive(Default)]
pub struct ServerState {
    pub store: RwLock<Store>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Build the API router over `state`.
pub fn router(state: Arc<ServerState>) -> Router {
    let api = Router::new()
        .route("/events/track", post(handlers::track_event))
        .route("/events/track/batch", post(handlers::track_batch))
        .route("/events/events", get(handlers::list_events))
        .route("/events/stats", get(handlers::event_stats))
        .route("/events/analytics", get(handlers::event_analytics))
        .route("/websites/register", post(handlers::register_website))
        .route("/websites/details", get(handlers::website_details))
        .route("/websites/update", put(handlers::update_website))
        .route(
            "/websites/regenerate-api-key",
            post(handlers::regenerate_api_key),
        )
        .route("/websites/analytics", get(handlers::website_analytics))
        .route("/websites/delete", delete(handlers::delete_website))
        .route("/health", get(handlers::health));

    // The tracker posts cross-origin from arbitrary sites.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
        ]);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new());
    let app = router(state);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Web3 funnel API listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
