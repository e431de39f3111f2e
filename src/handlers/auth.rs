//! The token pre-check shared by the guest and admin endpoints.

use crate::validation::token_matches;
use crate::AppState;
use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

/// Proves that the request carried the configured `token` query parameter.
pub struct Authorized;

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for Authorized {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();

        if token_matches(query.token.as_deref(), &state.token) {
            return Ok(Authorized);
        }

        warn!(
            "Rejected request to {path} with an invalid or missing token",
            path = parts.uri.path()
        );
        Err(problemdetails::new(StatusCode::UNAUTHORIZED)
            .with_title("Unauthorized")
            .with_detail("Invalid or missing token")
            .with_instance(parts.uri.path().to_string())
            .into_response())
    }
}
