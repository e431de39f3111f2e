//! Contains the `/stop` endpoint.

use crate::handlers::auth::Authorized;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tracing::warn;

pub trait ShutdownRoutes {
    /// Provides an API for stopping the relay gracefully.
    ///
    /// ```http
    /// POST /stop?token=... HTTP/1.1
    /// ```
    fn map_shutdown_endpoint(self) -> Self;
}

impl ShutdownRoutes for Router<AppState> {
    fn map_shutdown_endpoint(self) -> Self {
        self.route("/stop", post(shutdown))
    }
}

/// Initiates a graceful shutdown. Transfers in flight are finished first.
async fn shutdown(_: Authorized, State(state): State<AppState>) -> StatusCode {
    warn!("Initiating shutdown from API call");
    state.shutdown_tx.send(()).ok();
    StatusCode::ACCEPTED
}
