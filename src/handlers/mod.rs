//! Contains the HTTP endpoints.

mod admin;
mod auth;
mod health;
mod metrics;
mod shutdown;
mod upload;

pub use admin::AdminRoutes;
pub use health::HealthRoutes;
pub use metrics::MetricsRoutes;
pub use shutdown::ShutdownRoutes;
pub use upload::UploadRoutes;
