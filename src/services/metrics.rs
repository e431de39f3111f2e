//! Request accounting for the relay's HTTP API.

use axum::extract::{MatchedPath, Request};
use axum::http::{Method, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use metrics::http::HttpMetrics;
use pin_project::pin_project;
use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tower::Layer;
use tower_service::Service;
use tracing::debug;

/// The route label of requests that matched no endpoint.
const UNMATCHED_ROUTE: &str = "unmatched";

/// Counts and times every request to the upload, admin and health endpoints.
///
/// Requests are labelled with their route template, so `/admin/queue/:id`
/// is one series no matter how many records are inspected. Query strings
/// are never recorded since they carry the access token.
#[derive(Clone)]
pub struct RequestMetrics<S> {
    inner: S,
}

/// Wraps the router in [`RequestMetrics`].
#[derive(Clone, Default)]
pub struct RequestMetricsLayer;

impl<S> Layer<S> for RequestMetricsLayer {
    type Service = RequestMetrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestMetrics { inner }
    }
}

impl<S, B> Service<Request<B>> for RequestMetrics<S>
where
    S: Service<Request<B>>,
    S::Response: IntoResponse,
{
    type Response = Response;
    type Error = S::Error;
    type Future = RequestMetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let tracker = RequestTracker::start(&request);
        RequestMetricsFuture {
            future: self.inner.call(request),
            tracker,
        }
    }
}

/// Resolves to the endpoint's response once its outcome has been recorded.
#[pin_project]
pub struct RequestMetricsFuture<F>
where
    F: Future,
{
    #[pin]
    future: F,
    tracker: RequestTracker,
}

impl<F, R, E> Future for RequestMetricsFuture<F>
where
    F: Future<Output = Result<R, E>>,
    R: IntoResponse,
{
    type Output = Result<Response, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = match this.future.poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };

        Poll::Ready(match result {
            Ok(reply) => {
                let response = reply.into_response();
                this.tracker
                    .finish(Outcome::Answered(response.status(), response.version()));
                Ok(response)
            }
            Err(e) => {
                this.tracker.finish(Outcome::Errored);
                Err(e)
            }
        })
    }
}

/// Holds a request in the in-flight gauge until it is dropped, then
/// records how the request ended.
///
/// Lives outside [`RequestMetricsFuture`] because a
/// [`pin_project`](pin_project::pin_project) type cannot implement [`Drop`].
struct RequestTracker {
    version: Version,
    method: Method,
    route: String,
    start: Instant,
    outcome: Cell<Outcome>,
}

#[derive(Clone, Copy)]
enum Outcome {
    /// Still waiting for the endpoint; a drop in this state means the
    /// client went away.
    Pending,
    /// The endpoint failed without producing a response.
    Errored,
    /// The endpoint answered.
    Answered(StatusCode, Version),
}

impl RequestTracker {
    fn start<B>(request: &Request<B>) -> Self {
        let method = request.method().clone();
        let version = request.version();
        let route = route_label(request);

        debug!("Start processing {version:?} {method} {route}");
        HttpMetrics::inc_in_flight(route.as_str());
        Self {
            version,
            method,
            route,
            start: Instant::now(),
            outcome: Cell::new(Outcome::Pending),
        }
    }

    fn finish(&self, outcome: Outcome) {
        self.outcome.set(outcome)
    }

    fn elapsed(&self) -> Duration {
        Instant::now() - self.start
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        let elapsed = self.elapsed();
        match self.outcome.get() {
            Outcome::Pending => {
                debug!(
                    "Abandoned {version:?} {method} {route} after {elapsed:?}",
                    version = self.version,
                    method = self.method,
                    route = self.route,
                );
            }
            Outcome::Errored => {
                debug!(
                    "Failed {version:?} {method} {route} - {elapsed:?}",
                    version = self.version,
                    method = self.method,
                    route = self.route,
                );
                HttpMetrics::track(&self.route, &self.method, 0, elapsed);
            }
            Outcome::Answered(status, version) => {
                debug!(
                    "Done processing {version:?} {method} {route}: {response_version:?} {status} - {elapsed:?}",
                    version = self.version,
                    method = self.method,
                    route = self.route,
                    response_version = version,
                );
                HttpMetrics::track(&self.route, &self.method, status.as_u16(), elapsed);
            }
        }

        HttpMetrics::dec_in_flight(self.route.as_str());
    }
}

/// The route template the request was matched against.
fn route_label<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| String::from(UNMATCHED_ROUTE))
}
