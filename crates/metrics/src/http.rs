//! Contains HTTP metrics related code, notably [`HttpMetrics`].

use http::Method;
use lazy_static::lazy_static;
use prometheus_client::encoding::LabelValueEncoder;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::{Registry, Unit};
use std::fmt::{Display, Formatter, Write};
use std::time::Duration;

lazy_static! {
    static ref TRACK_ENDPOINT: Family<Labels, Counter> = Family::default();
    static ref TRACK_DURATION: Family<Labels, Counter<f64>> = Family::default();
    static ref TRACK_IN_FLIGHT: Family<InFlightLabels, Gauge> = Family::default();
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Labels {
    method: HttpMethod,
    path: String,
    /// The HTTP status code.
    status: u16,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct InFlightLabels {
    path: String,
}

/// The HTTP method to track. The relay only serves `GET` and `POST`;
/// everything else is tracked by name.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Other(String),
}

impl EncodeLabelValue for HttpMethod {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(self.to_string().as_str())
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Other(other) => write!(f, "{other}"),
        }
    }
}

impl From<&Method> for HttpMethod {
    fn from(value: &Method) -> Self {
        match value {
            &Method::GET => Self::Get,
            &Method::POST => Self::Post,
            other => Self::Other(other.as_str().to_string()),
        }
    }
}

impl From<Method> for HttpMethod {
    fn from(value: Method) -> Self {
        HttpMethod::from(&value)
    }
}

/// Register the `http_requests` metric family with the registry.
pub(crate) fn register_http_requests(registry: &mut Registry) {
    registry.register(
        "http_requests",
        "Number of HTTP requests received",
        TRACK_ENDPOINT.clone(),
    );

    registry.register_with_unit(
        "http_duration",
        "Duration of HTTP requests executed",
        Unit::Seconds,
        TRACK_DURATION.clone(),
    );

    registry.register(
        "http_requests_in_flight",
        "Number of requests that are currently in flight",
        TRACK_IN_FLIGHT.clone(),
    );
}

/// HTTP call metrics.
pub struct HttpMetrics;

impl HttpMetrics {
    /// Tracks one call to the specified HTTP path and method.
    pub fn track<P, M>(path: P, method: M, status: u16, elapsed: Duration)
    where
        P: AsRef<str>,
        M: Into<HttpMethod>,
    {
        let labels = Labels {
            method: method.into(),
            path: path.as_ref().to_string(),
            status,
        };
        TRACK_ENDPOINT.get_or_create(&labels).inc();
        TRACK_DURATION
            .get_or_create(&labels)
            .inc_by(elapsed.as_secs_f64());
    }

    pub fn inc_in_flight<P: AsRef<str>>(path: P) {
        TRACK_IN_FLIGHT
            .get_or_create(&InFlightLabels {
                path: path.as_ref().to_string(),
            })
            .inc();
    }

    pub fn dec_in_flight<P: AsRef<str>>(path: P) {
        TRACK_IN_FLIGHT
            .get_or_create(&InFlightLabels {
                path: path.as_ref().to_string(),
            })
            .dec();
    }
}
