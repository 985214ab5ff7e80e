//! HTTP server wiring and request routing.
//!
//! Routes:
//! - `POST /deliveries` — signed webhook ingestion
//! - `GET /deliveries/dlq` — dead-letter listing (operator surface)
//! - `POST /deliveries/dlq/{delivery_id}/replay` — manual replay
//! - `DELETE /deliveries/dlq/{delivery_id}` — permanent removal
//! - `GET /health`, `/live`, `/ready` — orchestration probes
//!
//! Middleware order: request-id injection, request tracing, timeout
//! enforcement. The server shuts down gracefully on SIGINT/SIGTERM, letting
//! in-flight deliveries finish their ledger commits.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use inlet_core::{ledger::Ledger, time::Clock};
use inlet_engine::Processor;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::handlers;

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The delivery ledger, shared with the processor.
    pub ledger: Arc<dyn Ledger>,
    /// Runs claimed deliveries through dispatch and commit.
    pub processor: Arc<Processor>,
    /// Clock used for signature freshness checks.
    pub clock: Arc<dyn Clock>,
    /// Shared secret deliveries are signed with.
    pub signing_secret: Arc<String>,
    /// Clock-skew tolerance for signature timestamps.
    pub signature_tolerance: chrono::Duration,
}

impl AppState {
    /// Assembles the application state.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        processor: Arc<Processor>,
        clock: Arc<dyn Clock>,
        signing_secret: impl Into<String>,
        signature_tolerance: chrono::Duration,
    ) -> Self {
        Self {
            ledger,
            processor,
            clock,
            signing_secret: Arc::new(signing_secret.into()),
            signature_tolerance,
        }
    }
}

/// Creates the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/live", get(handlers::liveness_check))
        .route("/ready", get(handlers::readiness_check));

    let delivery_routes = Router::new()
        .route("/deliveries", post(handlers::ingest_delivery))
        .route("/deliveries/dlq", get(handlers::list_dead_letters))
        .route("/deliveries/dlq/{delivery_id}/replay", post(handlers::replay_delivery))
        .route("/deliveries/dlq/{delivery_id}", delete(handlers::purge_delivery))
        // Leave headroom above the documented cap so the handler can answer
        // oversized payloads with its own error body.
        .layer(DefaultBodyLimit::max(handlers::ingest::MAX_PAYLOAD_SIZE + 4096));

    Router::new()
        .merge(health_routes)
        .merge(delivery_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware injecting an `X-Request-Id` header for cross-service tracing.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server with graceful shutdown support.
///
/// # Errors
///
/// Returns `std::io::Error` if the port is already in use or the network
/// interface is unavailable.
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Waiting for in-flight deliveries to commit");
}
