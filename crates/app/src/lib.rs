//! CRMI engine application composition root
//!
//! Wires the repository gateway, terminology client, package registry and artifact
//! model into the artifacts router.

use std::sync::Arc;

use axum::Router;
use crmi_artifacts::{
    ArtifactServices, ArtifactsState, ExpansionCache, PublishConfig, RepositoryConfig,
    RepositoryFactory,
};
use crmi_common::config::Config;
use crmi_domain::model::{self, FhirVersion};
use crmi_terminology::{PackageRegistry, TerminologyClientFactory, TerminologyConfig};

/// Build the services every lifecycle operation shares
pub fn create_services(config: &Config) -> Result<ArtifactServices, anyhow::Error> {
    let version: FhirVersion = config.fhir_version.parse()?;
    let model = model::for_version(version);

    let repository = RepositoryFactory::create(RepositoryConfig::from(config), Arc::clone(&model))?;

    let terminology_config = TerminologyConfig::from(config);
    let default_endpoint = terminology_config.default_endpoint();
    let terminology = TerminologyClientFactory::create(terminology_config, Arc::clone(&model))?;
    let packages = PackageRegistry::from_config(config, Arc::clone(&model))?;

    tracing::info!(fhir_version = %version, "Artifact services ready");

    Ok(ArtifactServices::new(repository, terminology, model)
        .with_expansion_cache(Arc::new(ExpansionCache::new()))
        .with_default_endpoint(default_endpoint)
        .with_publish_config(PublishConfig::from(config))
        .with_package_registry(Arc::new(packages)))
}

/// Create the main application router with all routes
pub fn create_app(config: &Config) -> Result<Router, anyhow::Error> {
    let services = create_services(config)?;

    let app = Router::new()
        .route("/health", axum::routing::get(health_check))
        .route(
            "/",
            axum::routing::get(|| async { "CRMI engine v0.0.1-SNAPSHOT" }),
        )
        .merge(crmi_artifacts::routes().with_state(ArtifactsState::new(services)));

    Ok(app)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
