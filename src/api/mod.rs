//! HTTP API endpoints.
//!
//! A thin shell over the pipeline: routing policy, authentication, and
//! request validation beyond basic shape belong to external
//! collaborators.

pub mod health;
pub mod query;
pub mod sources;

use axum::Router;

use crate::AppState;

/// Assemble all API routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(query::router())
        .merge(sources::router())
}
