//! Artifacts domain: lifecycle operations over knowledge artifacts
//!
//! - Repository gateway (in-memory and FHIR REST implementations)
//! - Dependency graph resolution and version selection
//! - Value set expansion with an optional shared cache
//! - Lifecycle visitors: approve, draft, release, retire, withdraw, delete, package
//! - Batched publishing with retry and rollback

pub mod api;
pub mod domain;
pub mod expansion;
pub mod publish;
pub mod repository;
pub mod visitors;

// Re-export domain types at the crate root for convenience
pub use domain::parameters::OperationParameters;
pub use domain::resolver::{DependencyResolver, ResolvedArtifact, WalkOptions};
pub use domain::traversal::TraversalContext;
pub use domain::version_policy::VersionPolicy;

// Re-export services
pub use expansion::cache::ExpansionCache;
pub use expansion::ExpansionEngine;
pub use publish::{PublishConfig, PublishOutcome, PublishStrategy, PublishStrategyKind};
pub use visitors::{ArtifactServices, Operation, Visitor};

// Re-export repository types
pub use repository::{RepositoryConfig, RepositoryError, RepositoryFactory, RepositoryGateway};

// Re-export API types
pub use api::routes;
pub use api::ArtifactsState;
