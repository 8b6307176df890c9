//! Route definitions for Artifacts domain API

use axum::{routing::post, Router};

use super::handlers::operations;
use super::middleware::ArtifactsState;

/// `POST /{resourceType}/{id}/${operation}`
fn operation_routes() -> Router<ArtifactsState> {
    Router::new().route(
        "/{resource_type}/{id}/{operation}",
        post(operations::run_operation),
    )
}

/// Create all Artifacts domain API routes
pub fn routes() -> Router<ArtifactsState> {
    Router::new().merge(operation_routes())
}
