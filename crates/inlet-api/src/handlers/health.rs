//! Health check handlers for orchestration probes.

use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use inlet_core::ledger::Ledger as _;
use serde::Serialize;
use tracing::{debug, error};

use crate::server::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health.
    pub status: HealthStatus,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
    /// Individual component checks.
    pub checks: HealthChecks,
    /// Service version.
    pub version: String,
}

/// Overall health status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All components operational.
    Healthy,
    /// Critical components failing.
    Unhealthy,
}

/// Component health results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Delivery ledger connectivity.
    pub ledger: ComponentHealth,
}

/// Health of one component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Whether the component responded.
    pub status: ComponentStatus,
    /// Error message when down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Check duration in milliseconds.
    pub response_time_ms: u64,
}

/// Component status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is reachable.
    Up,
    /// Component is failing.
    Down,
}

/// Primary health check: verifies ledger connectivity.
pub async fn health_check(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let ledger_result = state.ledger.ping().await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (status, ledger, code) = match ledger_result {
        Ok(()) => {
            debug!(response_time_ms = elapsed_ms, "ledger health check passed");
            (
                HealthStatus::Healthy,
                ComponentHealth {
                    status: ComponentStatus::Up,
                    message: None,
                    response_time_ms: elapsed_ms,
                },
                StatusCode::OK,
            )
        },
        Err(e) => {
            error!(error = %e, "ledger health check failed");
            (
                HealthStatus::Unhealthy,
                ComponentHealth {
                    status: ComponentStatus::Down,
                    message: Some(e.to_string()),
                    response_time_ms: elapsed_ms,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            )
        },
    };

    let body = HealthResponse {
        status,
        timestamp: state.clock.now_utc(),
        checks: HealthChecks { ledger },
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (code, Json(body)).into_response()
}

/// Liveness probe: the process is up and serving.
pub async fn liveness_check() -> Response {
    StatusCode::OK.into_response()
}

/// Readiness probe: the service can reach its ledger.
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    match state.ledger.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!(error = %e, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        },
    }
}
