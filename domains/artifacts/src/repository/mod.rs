//! Repository gateway for the Artifacts domain
//!
//! The gateway is the only way lifecycle operations read or write resources:
//! - `memory`: in-process store with atomic transactions, used for tests and local runs
//! - `fhir`: a FHIR REST server

pub mod fhir;
pub mod memory;

use std::sync::Arc;

use crmi_common::config::Config;
use crmi_domain::model::ArtifactModel;
use crmi_domain::{Artifact, ArtifactStatus, Bundle};
use thiserror::Error;

pub use fhir::FhirRepository;
pub use memory::InMemoryRepository;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Repository conflict: {0}")]
    Conflict(String),

    #[error("Repository request error: {0}")]
    Request(String),

    #[error("Repository response error: {0}")]
    Response(String),

    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

impl From<RepositoryError> for crmi_common::Error {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(reference) => crmi_common::Error::NotFound(reference),
            other => crmi_common::Error::Repository(other.to_string()),
        }
    }
}

/// Repository configuration.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Repository provider (memory, fhir)
    pub provider: String,
    /// Base url of the FHIR server
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            base_url: "http://localhost:8080/fhir".to_string(),
            timeout_secs: 30,
        }
    }
}

impl From<&Config> for RepositoryConfig {
    fn from(config: &Config) -> Self {
        Self {
            provider: config.repository_provider.clone(),
            base_url: config.repository_base_url.clone(),
            ..Self::default()
        }
    }
}

/// Storage of canonical resources.
#[async_trait::async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// Every stored version matching a canonical reference (`url` or `url|version`).
    ///
    /// The resource type is taken from the url when it names one.
    async fn search(
        &self,
        reference: &str,
        status: Option<ArtifactStatus>,
    ) -> Result<Vec<Artifact>, RepositoryError>;

    /// Read one resource by type and id.
    async fn read(&self, resource_type: &str, id: &str) -> Result<Artifact, RepositoryError>;

    /// Store a new resource; the stored copy carries the assigned id.
    async fn create(&self, resource: Artifact) -> Result<Artifact, RepositoryError>;

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), RepositoryError>;

    /// Apply every entry of a transaction bundle, or none of them.
    async fn transaction(&self, bundle: Bundle) -> Result<Bundle, RepositoryError>;

    /// Assessment records targeting the given canonical.
    ///
    /// A `url|version` canonical finds that version's assessments only, a bare url those of
    /// every version.
    async fn search_assessments(&self, canonical: &str) -> Result<Vec<Artifact>, RepositoryError>;
}

/// Factory for creating RepositoryGateway implementations.
pub struct RepositoryFactory;

impl RepositoryFactory {
    /// Create a RepositoryGateway based on configuration.
    pub fn create(
        config: RepositoryConfig,
        model: Arc<dyn ArtifactModel>,
    ) -> Result<Arc<dyn RepositoryGateway>, RepositoryError> {
        match config.provider.as_str() {
            "fhir" => {
                tracing::info!(base_url = %config.base_url, "Creating FHIR repository gateway");
                Ok(Arc::new(FhirRepository::new(config, model)?))
            }
            "memory" => {
                tracing::info!("Creating in-memory repository gateway");
                Ok(Arc::new(InMemoryRepository::new()))
            }
            provider => Err(RepositoryError::Request(format!(
                "Unknown repository provider: {}. Supported providers: fhir, memory",
                provider
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmi_domain::model::R4Model;

    // RP-U01: factory builds the in-memory gateway by default
    #[test]
    fn test_factory_memory_succeeds() {
        let result = RepositoryFactory::create(RepositoryConfig::default(), Arc::new(R4Model));
        assert!(result.is_ok());
    }

    // RP-U02: factory builds the FHIR gateway
    #[test]
    fn test_factory_fhir_succeeds() {
        let config = RepositoryConfig {
            provider: "fhir".to_string(),
            ..RepositoryConfig::default()
        };
        assert!(RepositoryFactory::create(config, Arc::new(R4Model)).is_ok());
    }

    // RP-U03: unknown provider is rejected
    #[test]
    fn test_factory_unknown_provider() {
        let config = RepositoryConfig {
            provider: "postgres".to_string(),
            ..RepositoryConfig::default()
        };
        let err = match RepositoryFactory::create(config, Arc::new(R4Model)) {
            Err(e) => e,
            Ok(_) => panic!("Expected error for unknown provider"),
        };
        assert!(err.to_string().contains("Unknown repository provider: postgres"));
    }

    // RP-U04: error conversion into the engine taxonomy
    #[test]
    fn test_error_conversion() {
        let not_found: crmi_common::Error =
            RepositoryError::NotFound("Library/a".to_string()).into();
        assert!(matches!(not_found, crmi_common::Error::NotFound(_)));

        let unavailable: crmi_common::Error =
            RepositoryError::Unavailable("connection reset".to_string()).into();
        assert!(matches!(unavailable, crmi_common::Error::Repository(_)));
        assert!(unavailable.is_transient());
    }
}
