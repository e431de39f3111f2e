//! Contains the `/metrics` endpoint.

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics::Metrics;

pub trait MetricsRoutes {
    /// Provides an API for Prometheus/OpenMetrics metrics.
    ///
    /// ```http
    /// GET /metrics HTTP/1.1
    /// ```
    fn map_metrics_endpoint(self) -> Self;
}

impl<S> MetricsRoutes for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn map_metrics_endpoint(self) -> Self {
        self.route("/metrics", get(render_metrics))
    }
}

async fn render_metrics() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        Metrics::get().encode(),
    )
}
