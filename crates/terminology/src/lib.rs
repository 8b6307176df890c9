//! CRMI Terminology Service
//!
//! Provides value set expansion and terminology resource lookup with support for:
//! - FHIR terminology servers over HTTP for production
//! - A programmable mock terminology service for testing and development
//! - Downloading published packages from a package registry

pub mod client;
pub mod downloader;
pub mod mock;
pub mod registry;

use std::sync::Arc;

use crmi_common::config::Config;
use crmi_domain::model::ArtifactModel;
use crmi_domain::{Artifact, Endpoint};
use serde_json::Value;
use thiserror::Error;

pub use downloader::{DownloaderConfig, PackageDownloader};
pub use registry::PackageRegistry;

#[derive(Error, Debug)]
pub enum TerminologyError {
    #[error("Terminology configuration error: {0}")]
    Configuration(String),

    #[error("Terminology request error: {0}")]
    Request(String),

    #[error("Terminology response error: {0}")]
    Response(String),

    #[error("Terminology resource not found: {0}")]
    NotFound(String),
}

impl From<TerminologyError> for crmi_common::Error {
    fn from(err: TerminologyError) -> Self {
        match err {
            TerminologyError::NotFound(reference) => crmi_common::Error::NotFound(reference),
            other => crmi_common::Error::Terminology(other.to_string()),
        }
    }
}

/// Terminology service configuration.
#[derive(Clone)]
pub struct TerminologyConfig {
    /// Terminology provider (fhir, mock)
    pub provider: String,
    /// Default endpoint used when an operation does not name one
    pub endpoint: Option<String>,
    /// Optional bearer token sent to the endpoint
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl std::fmt::Debug for TerminologyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminologyConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for TerminologyConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            endpoint: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl TerminologyConfig {
    /// Create terminology config from environment variables.
    pub fn from_env() -> Result<Self, TerminologyError> {
        let provider =
            std::env::var("TERMINOLOGY_PROVIDER").unwrap_or_else(|_| "mock".to_string());
        let endpoint = std::env::var("TERMINOLOGY_ENDPOINT")
            .ok()
            .filter(|e| !e.trim().is_empty());
        let api_key = std::env::var("TERMINOLOGY_API_KEY").ok();

        if provider == "fhir" && endpoint.is_none() {
            return Err(TerminologyError::Configuration(
                "TERMINOLOGY_ENDPOINT is required for the fhir provider".to_string(),
            ));
        }

        Ok(Self {
            provider,
            endpoint,
            api_key,
            ..Self::default()
        })
    }

    /// Default endpoint as an [`Endpoint`], when one is configured
    pub fn default_endpoint(&self) -> Option<Endpoint> {
        self.endpoint.as_deref().map(Endpoint::new)
    }
}

impl From<&Config> for TerminologyConfig {
    fn from(config: &Config) -> Self {
        Self {
            provider: config.terminology_provider.clone(),
            endpoint: config.terminology_endpoint.clone(),
            api_key: config.terminology_api_key.clone(),
            ..Self::default()
        }
    }
}

/// Terminology client trait for different implementations.
#[async_trait::async_trait]
pub trait TerminologyClient: Send + Sync {
    /// Expand a value set on the endpoint; returns the value set carrying the expansion.
    async fn expand(
        &self,
        value_set: &Artifact,
        endpoint: &Endpoint,
        parameters: Option<&Value>,
    ) -> Result<Artifact, TerminologyError>;

    /// Fetch a resource by canonical url, optionally pinned to a version.
    ///
    /// Without a version the latest one is returned.
    async fn get_resource(
        &self,
        endpoint: &Endpoint,
        reference: &str,
        version: Option<&str>,
    ) -> Result<Option<Artifact>, TerminologyError>;

    /// Fetch the latest version of a resource whose status is not draft.
    async fn get_latest_non_draft_resource(
        &self,
        endpoint: &Endpoint,
        reference: &str,
    ) -> Result<Option<Artifact>, TerminologyError>;
}

/// Factory for creating TerminologyClient implementations.
pub struct TerminologyClientFactory;

impl TerminologyClientFactory {
    /// Create a TerminologyClient based on configuration.
    pub fn create(
        config: TerminologyConfig,
        model: Arc<dyn ArtifactModel>,
    ) -> Result<Arc<dyn TerminologyClient>, TerminologyError> {
        match config.provider.as_str() {
            "fhir" => {
                tracing::info!(endpoint = ?config.endpoint, "Creating FHIR terminology client");
                Ok(Arc::new(client::FhirTerminologyClient::new(config, model)?))
            }
            "mock" => {
                tracing::info!("Creating mock terminology client");
                Ok(Arc::new(mock::MockTerminologyClient::new()))
            }
            provider => Err(TerminologyError::Configuration(format!(
                "Unknown terminology provider: {}. Supported providers: fhir, mock",
                provider
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmi_domain::model::R4Model;
    use serial_test::serial;

    fn model() -> Arc<dyn ArtifactModel> {
        Arc::new(R4Model)
    }

    // TX-U01: factory builds the mock by default
    #[test]
    fn test_factory_mock_succeeds() {
        let result = TerminologyClientFactory::create(TerminologyConfig::default(), model());
        assert!(result.is_ok());
    }

    // TX-U02: factory builds the FHIR client
    #[test]
    fn test_factory_fhir_succeeds() {
        let config = TerminologyConfig {
            provider: "fhir".to_string(),
            endpoint: Some("http://tx.example.org/fhir".to_string()),
            ..TerminologyConfig::default()
        };
        assert!(TerminologyClientFactory::create(config, model()).is_ok());
    }

    // TX-U03: unknown provider is a configuration error
    #[test]
    fn test_factory_unknown_provider() {
        let config = TerminologyConfig {
            provider: "invalid".to_string(),
            ..TerminologyConfig::default()
        };
        let err = match TerminologyClientFactory::create(config, model()) {
            Err(e) => e,
            Ok(_) => panic!("Expected error for unknown provider"),
        };
        assert!(err
            .to_string()
            .contains("Unknown terminology provider: invalid"));
    }

    // TX-U04: api key never shows up in Debug output
    #[test]
    fn test_config_debug_redacts_api_key() {
        let config = TerminologyConfig {
            api_key: Some("super-secret".to_string()),
            ..TerminologyConfig::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    // TX-U05: fhir provider without endpoint is rejected
    #[test]
    #[serial]
    fn test_from_env_requires_endpoint_for_fhir() {
        std::env::set_var("TERMINOLOGY_PROVIDER", "fhir");
        std::env::remove_var("TERMINOLOGY_ENDPOINT");
        let result = TerminologyConfig::from_env();
        std::env::remove_var("TERMINOLOGY_PROVIDER");
        assert!(matches!(result, Err(TerminologyError::Configuration(_))));
    }

    // TX-U06: environment values are picked up
    #[test]
    #[serial]
    fn test_from_env_reads_endpoint() {
        std::env::set_var("TERMINOLOGY_PROVIDER", "fhir");
        std::env::set_var("TERMINOLOGY_ENDPOINT", "http://tx.example.org/fhir");
        let config = TerminologyConfig::from_env().unwrap();
        std::env::remove_var("TERMINOLOGY_PROVIDER");
        std::env::remove_var("TERMINOLOGY_ENDPOINT");

        assert_eq!(config.provider, "fhir");
        assert_eq!(
            config.default_endpoint(),
            Some(Endpoint::new("http://tx.example.org/fhir"))
        );
    }

    // TX-U07: error conversion into the engine taxonomy
    #[test]
    fn test_error_conversion() {
        let not_found: crmi_common::Error =
            TerminologyError::NotFound("http://x.org/ValueSet/a".to_string()).into();
        assert!(matches!(not_found, crmi_common::Error::NotFound(_)));

        let response: crmi_common::Error =
            TerminologyError::Response("500 Internal Server Error".to_string()).into();
        assert!(matches!(response, crmi_common::Error::Terminology(_)));
        assert_eq!(response.status_code().as_u16(), 502);
    }

    // TX-U08: error Display output
    #[test]
    fn test_error_display() {
        assert_eq!(
            TerminologyError::Configuration("bad config".to_string()).to_string(),
            "Terminology configuration error: bad config"
        );
        assert_eq!(
            TerminologyError::Request("connection refused".to_string()).to_string(),
            "Terminology request error: connection refused"
        );
    }
}
