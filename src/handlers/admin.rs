//! Contains the `/admin` endpoints for inspecting and driving the transfer queue.

use crate::handlers::auth::Authorized;
use crate::AppState;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use shortguid::ShortGuid;
use tracing::{info, warn};
use transfer_queue::{QueueError, QueueStats, TransferRecord, TransferStatus};

pub trait AdminRoutes {
    /// Provides the administrative API of the transfer queue.
    ///
    /// To list the queue, optionally filtered by status:
    ///
    /// ```http
    /// GET /admin/queue?token=...&status=failed HTTP/1.1
    /// ```
    ///
    /// To inspect a single record:
    ///
    /// ```http
    /// GET /admin/queue/{id}?token=... HTTP/1.1
    /// ```
    ///
    /// To re-dispatch every failed record:
    ///
    /// ```http
    /// POST /admin/retry?token=... HTTP/1.1
    /// ```
    ///
    /// To check whether the remote target is reachable:
    ///
    /// ```http
    /// GET /admin/transport-test?token=... HTTP/1.1
    /// ```
    fn map_admin_endpoints(self) -> Self;
}

impl AdminRoutes for Router<AppState> {
    fn map_admin_endpoints(self) -> Self {
        self.route("/admin/queue", get(list_queue))
            .route("/admin/queue/:id", get(get_record))
            .route("/admin/retry", post(retry_failed))
            .route("/admin/transport-test", get(transport_test))
    }
}

#[derive(Debug, Default, Deserialize)]
struct QueueQuery {
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueueListing {
    stats: QueueStats,
    records: Vec<TransferRecord>,
}

#[derive(Debug, Serialize)]
struct TransportTestResult {
    success: bool,
    message: String,
    transport: String,
}

async fn list_queue(
    _: Authorized,
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> Response {
    let status = match query.status.as_deref().map(str::parse::<TransferStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => {
            return problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Invalid status filter")
                .with_detail(e.to_string())
                .with_instance("/admin/queue")
                .into_response();
        }
    };

    let listing = QueueListing {
        stats: state.queue.stats().await,
        records: state.queue.list_queue(status).await,
    };
    Json(listing).into_response()
}

async fn get_record(
    _: Authorized,
    State(state): State<AppState>,
    id: Result<Path<ShortGuid>, PathRejection>,
) -> Response {
    let id = match id {
        Ok(Path(id)) => id,
        Err(e) => {
            return problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Invalid transfer ID")
                .with_detail(e.body_text())
                .into_response();
        }
    };

    match state.queue.get(id).await {
        Ok(record) => Json(record).into_response(),
        Err(QueueError::NotFound(id)) => problemdetails::new(StatusCode::NOT_FOUND)
            .with_title("Transfer not found")
            .with_detail(format!("No transfer record with ID {id}"))
            .with_instance(format!("/admin/queue/{id}"))
            .with_value("id", id.to_string())
            .into_response(),
        Err(e) => problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
            .with_title("Failed to look up the transfer")
            .with_detail(e.to_string())
            .into_response(),
    }
}

async fn retry_failed(_: Authorized, State(state): State<AppState>) -> Response {
    match state.queue.retry_failed().await {
        Ok(summary) => {
            info!(
                "Admin requested a retry of failed transfers, {count} re-dispatched",
                count = summary.retried
            );
            Json(summary).into_response()
        }
        Err(QueueError::ShuttingDown) => problemdetails::new(StatusCode::SERVICE_UNAVAILABLE)
            .with_title("Shutting down")
            .with_detail("The transfer queue is shutting down and accepts no retries")
            .with_instance("/admin/retry")
            .into_response(),
        Err(e) => problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
            .with_title("Failed to retry transfers")
            .with_detail(e.to_string())
            .into_response(),
    }
}

async fn transport_test(_: Authorized, State(state): State<AppState>) -> Response {
    let transport = state.queue.transport_tag().to_string();
    let result = match state.queue.test_transport_connection().await {
        Ok(message) => TransportTestResult {
            success: true,
            message,
            transport,
        },
        Err(failure) => {
            warn!("Transport connection test failed: {failure}");
            TransportTestResult {
                success: false,
                message: failure.to_string(),
                transport,
            }
        }
    };
    Json(result).into_response()
}
