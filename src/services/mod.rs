//! Contains Tower services.

mod metrics;
mod shutdown;

pub use metrics::RequestMetricsLayer;
pub use shutdown::ShutdownLayer;
