//! Mock Terminology Service Implementation
//!
//! Programmable mock for testing expansion and resolution workflows:
//! - Expansions and resources are registered per canonical url
//! - Failures can be switched on to exercise fallback paths
//! - Every call is recorded for test assertions

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crmi_common::canonical;
use crmi_domain::{selection, Artifact, Endpoint, Expansion};
use serde_json::Value;

use crate::{TerminologyClient, TerminologyError};

/// A call received by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedTerminologyCall {
    Expand {
        url: String,
        version: Option<String>,
        endpoint: String,
        parameters: Option<Value>,
    },
    GetResource {
        reference: String,
        version: Option<String>,
        endpoint: String,
    },
    GetLatestNonDraft {
        reference: String,
        endpoint: String,
    },
}

/// Expansion the mock answers with for one url
#[derive(Debug, Clone, Default)]
struct MockExpansion {
    /// Version the server reports for the value set
    version: Option<String>,
    expansion: Expansion,
}

/// Mock terminology client with programmable behavior
#[derive(Debug, Clone, Default)]
pub struct MockTerminologyClient {
    expansions: Arc<RwLock<HashMap<String, MockExpansion>>>,
    resources: Arc<RwLock<Vec<Artifact>>>,
    failure: Arc<RwLock<Option<String>>>,
    calls: Arc<Mutex<Vec<RecordedTerminologyCall>>>,
}

impl MockTerminologyClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `$expand` of `url` with the given expansion
    pub fn set_expansion(&self, url: &str, server_version: Option<&str>, expansion: Expansion) {
        self.expansions.write().unwrap().insert(
            url.to_string(),
            MockExpansion {
                version: server_version.map(str::to_string),
                expansion,
            },
        );
    }

    /// Make a resource available to lookups
    pub fn add_resource(&self, resource: Artifact) {
        self.resources.write().unwrap().push(resource);
    }

    /// Fail every call with a response error carrying this message
    pub fn fail_with(&self, message: &str) {
        *self.failure.write().unwrap() = Some(message.to_string());
    }

    /// Return all recorded calls.
    pub fn recorded_calls(&self) -> Vec<RecordedTerminologyCall> {
        self.calls
            .lock()
            .expect("calls lock poisoned: prior test panicked")
            .clone()
    }

    /// Number of `$expand` calls received
    pub fn expand_count(&self) -> usize {
        self.recorded_calls()
            .iter()
            .filter(|c| matches!(c, RecordedTerminologyCall::Expand { .. }))
            .count()
    }

    /// Clear recorded calls and programmed behavior.
    pub fn reset(&self) {
        self.calls
            .lock()
            .expect("calls lock poisoned: prior test panicked")
            .clear();
        self.expansions.write().unwrap().clear();
        self.resources.write().unwrap().clear();
        *self.failure.write().unwrap() = None;
    }

    fn record(&self, call: RecordedTerminologyCall) -> Result<(), TerminologyError> {
        self.calls
            .lock()
            .map_err(|e| TerminologyError::Request(format!("calls lock poisoned: {e}")))?
            .push(call);
        Ok(())
    }

    fn check_failure(&self) -> Result<(), TerminologyError> {
        let failure = self
            .failure
            .read()
            .map_err(|e| TerminologyError::Request(format!("failure lock poisoned: {e}")))?;
        match failure.as_ref() {
            Some(message) => Err(TerminologyError::Response(message.clone())),
            None => Ok(()),
        }
    }

    fn versions_of(&self, url: &str) -> Result<Vec<Artifact>, TerminologyError> {
        let resources = self
            .resources
            .read()
            .map_err(|e| TerminologyError::Request(format!("resources lock poisoned: {e}")))?;
        Ok(resources
            .iter()
            .filter(|r| r.url() == url)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl TerminologyClient for MockTerminologyClient {
    async fn expand(
        &self,
        value_set: &Artifact,
        endpoint: &Endpoint,
        parameters: Option<&Value>,
    ) -> Result<Artifact, TerminologyError> {
        tracing::debug!(url = %value_set.url(), "Mock terminology: expand");
        self.record(RecordedTerminologyCall::Expand {
            url: value_set.url().to_string(),
            version: value_set.version().map(str::to_string),
            endpoint: endpoint.address.clone(),
            parameters: parameters.cloned(),
        })?;
        self.check_failure()?;

        let programmed = self
            .expansions
            .read()
            .map_err(|e| TerminologyError::Request(format!("expansions lock poisoned: {e}")))?
            .get(value_set.url())
            .cloned()
            .ok_or_else(|| {
                TerminologyError::Response(format!(
                    "No expansion available for {}",
                    value_set.url()
                ))
            })?;

        let mut expanded = value_set.clone();
        expanded.expansion = Some(programmed.expansion);
        if let Some(version) = programmed.version {
            expanded.version = Some(version);
        }
        Ok(expanded)
    }

    async fn get_resource(
        &self,
        endpoint: &Endpoint,
        reference: &str,
        version: Option<&str>,
    ) -> Result<Option<Artifact>, TerminologyError> {
        tracing::debug!(reference = %reference, "Mock terminology: get resource");
        let version = version.or_else(|| canonical::version_part(reference));
        self.record(RecordedTerminologyCall::GetResource {
            reference: reference.to_string(),
            version: version.map(str::to_string),
            endpoint: endpoint.address.clone(),
        })?;
        self.check_failure()?;

        let candidates = self.versions_of(canonical::url_part(reference))?;
        Ok(match version {
            Some(version) => candidates
                .iter()
                .find(|c| c.version() == Some(version))
                .cloned(),
            None => selection::latest(&candidates).cloned(),
        })
    }

    async fn get_latest_non_draft_resource(
        &self,
        endpoint: &Endpoint,
        reference: &str,
    ) -> Result<Option<Artifact>, TerminologyError> {
        tracing::debug!(reference = %reference, "Mock terminology: latest non-draft");
        self.record(RecordedTerminologyCall::GetLatestNonDraft {
            reference: reference.to_string(),
            endpoint: endpoint.address.clone(),
        })?;
        self.check_failure()?;

        let candidates = self.versions_of(canonical::url_part(reference))?;
        Ok(selection::latest_non_draft(&candidates).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmi_domain::{ArtifactStatus, ExpansionContains};

    fn endpoint() -> Endpoint {
        Endpoint::new("http://tx.example.org/fhir")
    }

    fn expansion(codes: &[&str]) -> Expansion {
        Expansion {
            contains: codes
                .iter()
                .map(|code| ExpansionContains {
                    system: Some("http://loinc.org".to_string()),
                    code: Some(code.to_string()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    // TXM-U01: programmed expansion is returned and server version adopted
    #[tokio::test]
    async fn test_expand_returns_programmed_expansion() {
        let mock = MockTerminologyClient::new();
        mock.set_expansion("http://x.org/ValueSet/vs", Some("2024"), expansion(&["a", "b"]));

        let vs = Artifact::new("ValueSet", "vs", "http://x.org/ValueSet/vs");
        let expanded = mock.expand(&vs, &endpoint(), None).await.unwrap();

        assert_eq!(expanded.expansion.unwrap().contains.len(), 2);
        assert_eq!(expanded.version.as_deref(), Some("2024"));
        assert_eq!(mock.expand_count(), 1);
    }

    // TXM-U02: unknown value set is a response error
    #[tokio::test]
    async fn test_expand_unknown_value_set_fails() {
        let mock = MockTerminologyClient::new();
        let vs = Artifact::new("ValueSet", "vs", "http://x.org/ValueSet/missing");
        let err = mock.expand(&vs, &endpoint(), None).await.unwrap_err();
        assert!(matches!(err, TerminologyError::Response(_)));
    }

    // TXM-U03: programmed failure applies to every call and is still recorded
    #[tokio::test]
    async fn test_fail_with() {
        let mock = MockTerminologyClient::new();
        mock.set_expansion("http://x.org/ValueSet/vs", None, expansion(&["a"]));
        mock.fail_with("server down");

        let vs = Artifact::new("ValueSet", "vs", "http://x.org/ValueSet/vs");
        assert!(mock.expand(&vs, &endpoint(), None).await.is_err());
        assert!(mock
            .get_latest_non_draft_resource(&endpoint(), "http://x.org/ValueSet/vs")
            .await
            .is_err());
        assert_eq!(mock.recorded_calls().len(), 2);

        mock.reset();
        assert!(mock.recorded_calls().is_empty());
        assert_eq!(mock.expand(&vs, &endpoint(), None).await.unwrap_err().to_string(),
            "Terminology response error: No expansion available for http://x.org/ValueSet/vs");
    }

    // TXM-U04: latest non-draft skips drafts
    #[tokio::test]
    async fn test_latest_non_draft() {
        let mock = MockTerminologyClient::new();
        for (id, version, status) in [
            ("a", "1.0.0", ArtifactStatus::Active),
            ("b", "2.0.0", ArtifactStatus::Draft),
            ("c", "1.5.0", ArtifactStatus::Retired),
        ] {
            mock.add_resource(
                Artifact::new("ValueSet", id, "http://x.org/ValueSet/vs")
                    .with_version(version)
                    .with_status(status),
            );
        }

        let latest = mock
            .get_latest_non_draft_resource(&endpoint(), "http://x.org/ValueSet/vs")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id.as_deref(), Some("c"));

        let pinned = mock
            .get_resource(&endpoint(), "http://x.org/ValueSet/vs|2.0.0", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pinned.id.as_deref(), Some("b"));

        let missing = mock
            .get_resource(&endpoint(), "http://x.org/ValueSet/vs", Some("9.9.9"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
