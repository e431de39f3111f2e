//! Contains the `/health` endpoints.

use crate::health::HealthState;
use crate::AppState;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::{Json, Router};
use serde::Serialize;
use transfer_queue::QueueStats;

/// Defines a type of health check.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HealthCheck {
    /// A Kubernetes startup probe.
    Startup,
    /// A Kubernetes readiness probe.
    Readiness,
    /// A Kubernetes liveliness probe.
    Liveness,
    /// A full health check.
    Full(HealthCheckFormat),
}

/// Defines a specific type of format representation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HealthCheckFormat {
    Compact,
    Complex,
}

pub trait HealthRoutes {
    /// Provides an API for initiating health checks.
    ///
    /// For readiness probes (compact output):
    ///
    /// ```http
    /// GET /readyz HTTP/1.1
    /// ```
    ///
    /// For liveness probes (compact output):
    ///
    /// ```http
    /// GET /livez HTTP/1.1
    /// ```
    ///
    /// For combined health probes (compact output):
    ///
    /// ```http
    /// GET /health HTTP/1.1
    /// ```
    ///
    /// For combined health probes including the queue statistics and a
    /// connection test of the transport, as JSON:
    ///
    /// ```http
    /// GET /healthz HTTP/1.1
    /// ```
    fn map_health_endpoints(self) -> Self;
}

impl HealthRoutes for Router<AppState> {
    fn map_health_endpoints(self) -> Self {
        self.route(
            "/health",
            health_endpoint(HealthCheck::Full(HealthCheckFormat::Compact)),
        )
        .route("/startupz", health_endpoint(HealthCheck::Startup))
        .route("/readyz", health_endpoint(HealthCheck::Readiness))
        .route("/livez", health_endpoint(HealthCheck::Liveness))
        .route(
            "/healthz",
            health_endpoint(HealthCheck::Full(HealthCheckFormat::Complex)),
        )
    }
}

/// The body of the complex health check.
#[derive(Debug, Serialize)]
struct HealthReport {
    status: HealthState,
    version: &'static str,
    queue: QueueStats,
    transport: TransportReport,
}

#[derive(Debug, Serialize)]
struct TransportReport {
    tag: String,
    reachable: bool,
    message: String,
}

/// Builds a health handler.
///
/// ## Arguments
/// * `checks` - The type of health check to run on that path.
fn health_endpoint(checks: HealthCheck) -> MethodRouter<AppState> {
    get(move |State(state): State<AppState>| handle_health(state, checks))
}

/// Performs a health check.
///
/// Startup, readiness and liveness only depend on the process serving
/// requests. The full checks also look at the transfer queue; only the
/// complex variant contacts the remote target.
async fn handle_health(state: AppState, checks: HealthCheck) -> Response {
    match checks {
        HealthCheck::Startup | HealthCheck::Readiness | HealthCheck::Liveness => {
            HealthState::Healthy.into_response()
        }
        HealthCheck::Full(HealthCheckFormat::Compact) => {
            HealthState::from_queue(&state.queue.stats().await).into_response()
        }
        HealthCheck::Full(HealthCheckFormat::Complex) => {
            let queue = state.queue.stats().await;
            let probe = state.queue.test_transport_connection().await;

            let status = match &probe {
                Ok(_) => HealthState::from_queue(&queue),
                Err(_) => HealthState::Failed,
            };

            let transport = TransportReport {
                tag: state.queue.transport_tag().to_string(),
                reachable: probe.is_ok(),
                message: match probe {
                    Ok(message) => message,
                    Err(failure) => failure.to_string(),
                },
            };

            Json(HealthReport {
                status,
                version: env!("CARGO_PKG_VERSION"),
                queue,
                transport,
            })
            .into_response()
        }
    }
}

impl IntoResponse for HealthState {
    fn into_response(self) -> Response {
        format!("{}", self).into_response()
    }
}
