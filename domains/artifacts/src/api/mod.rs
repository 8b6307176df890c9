//! HTTP surface for artifact operations
//!
//! Contains the operation handler, routes, and domain state definition.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use middleware::ArtifactsState;
pub use routes::routes;
