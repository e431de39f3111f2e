use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tower::Layer;
use tower_service::Service;
use tracing::debug;

/// A layer that refuses new requests once shutdown was signalled.
/// Uses [`ShutdownService`].
#[derive(Clone)]
pub struct ShutdownLayer {
    shutdown: Arc<AtomicBool>,
}

impl ShutdownLayer {
    pub fn new(mut shutdown: broadcast::Receiver<()>) -> Self {
        let signal = Arc::new(AtomicBool::new(false));
        tokio::spawn({
            let signal = signal.clone();
            async move {
                shutdown.recv().await.ok();
                signal.store(true, Ordering::SeqCst);
            }
        });

        Self { shutdown: signal }
    }
}

impl<S> Layer<S> for ShutdownLayer {
    type Service = ShutdownService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ShutdownService {
            inner,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// A middleware answering `503 Service Unavailable` while the relay shuts down.
#[derive(Clone)]
pub struct ShutdownService<S> {
    inner: S,
    shutdown: Arc<AtomicBool>,
}

impl<S, B> Service<Request<B>> for ShutdownService<S>
where
    S: Service<Request<B>>,
    S::Response: IntoResponse,
{
    type Response = Response;
    type Error = S::Error;
    type Future = ShutdownServiceFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        if self.shutdown.load(Ordering::SeqCst) {
            debug!(
                "Refusing {method} {path} during shutdown",
                method = request.method(),
                path = request.uri().path()
            );
            return ShutdownServiceFuture::Refused {
                instance: request.uri().path().to_string(),
            };
        }

        ShutdownServiceFuture::Forward {
            future: self.inner.call(request),
        }
    }
}

/// A future returned from the [`ShutdownService`].
#[pin_project(project = ShutdownServiceFutureProj)]
pub enum ShutdownServiceFuture<F> {
    Forward {
        #[pin]
        future: F,
    },
    Refused {
        instance: String,
    },
}

impl<F, R, E> Future for ShutdownServiceFuture<F>
where
    F: Future<Output = Result<R, E>>,
    R: IntoResponse,
{
    type Output = Result<Response, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ShutdownServiceFutureProj::Forward { future } => match future.poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(reply) => Poll::Ready(reply.map(IntoResponse::into_response)),
            },
            ShutdownServiceFutureProj::Refused { instance } => Poll::Ready(Ok(
                problemdetails::new(StatusCode::SERVICE_UNAVAILABLE)
                    .with_title("Service is shutting down")
                    .with_instance(std::mem::take(instance))
                    .into_response(),
            )),
        }
    }
}
