//! Common test utilities and fixtures for integration tests
//!
//! - Router over an in-memory repository and a mock terminology client
//! - Parameters builders and request helpers
//! - Library and value set fixtures

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use crmi_artifacts::repository::InMemoryRepository;
use crmi_artifacts::{routes, ArtifactServices, ArtifactsState, ExpansionCache};
use crmi_domain::{
    Artifact, ArtifactStatus, Compose, ConceptReference, ConceptSet, R4Model, RelatedArtifact,
};
use crmi_terminology::mock::MockTerminologyClient;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Router plus handles on its collaborators
pub struct TestApp {
    pub repo: InMemoryRepository,
    pub tx: MockTerminologyClient,
    pub cache: Arc<ExpansionCache>,
}

impl TestApp {
    pub fn new(resources: impl IntoIterator<Item = Artifact>) -> Self {
        Self {
            repo: InMemoryRepository::with_resources(resources),
            tx: MockTerminologyClient::new(),
            cache: Arc::new(ExpansionCache::new()),
        }
    }

    pub fn services(&self) -> ArtifactServices {
        ArtifactServices::new(
            Arc::new(self.repo.clone()),
            Arc::new(self.tx.clone()),
            Arc::new(R4Model),
        )
        .with_expansion_cache(Arc::clone(&self.cache))
    }

    pub fn router(&self) -> Router {
        routes().with_state(ArtifactsState::new(self.services()))
    }

    /// POST an operation and return the status with the parsed JSON body
    pub async fn operation(&self, uri: &str, parameters: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/fhir+json")
            .body(Body::from(parameters.to_string()))
            .unwrap();
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        (status, parse_body(response).await)
    }

    pub fn stored(&self, id: &str) -> Artifact {
        self.repo
            .get("Library", id)
            .unwrap_or_else(|| panic!("Library/{} is not stored", id))
    }
}

/// Parse a response body as JSON
pub async fn parse_body(response: axum::http::Response<Body>) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// `Parameters` resource from `(name, value[x] key, value)` triples
pub fn parameters(entries: &[(&str, &str, Value)]) -> Value {
    let parameter: Vec<Value> = entries
        .iter()
        .map(|(name, key, value)| {
            let mut entry = json!({ "name": name });
            entry[*key] = value.clone();
            entry
        })
        .collect();
    json!({"resourceType": "Parameters", "parameter": parameter})
}

pub fn no_parameters() -> Value {
    parameters(&[])
}

pub fn library(name: &str, version: &str, status: ArtifactStatus) -> Artifact {
    Artifact::new("Library", name, format!("http://x.org/Library/{}", name))
        .with_version(version)
        .with_status(status)
}

/// Draft root owning one draft component, approved a day after it was last modified
pub fn releasable() -> (Artifact, Artifact) {
    let modified = Utc::now() - Duration::days(2);
    let component =
        library("component", "1.2.0-draft", ArtifactStatus::Draft).with_date(modified);
    let root = library("root", "1.2.0-draft", ArtifactStatus::Draft)
        .with_date(modified)
        .with_approval_date((modified + Duration::days(1)).date_naive())
        .with_related_artifact(RelatedArtifact::component(
            "http://x.org/Library/component|1.2.0-draft",
            true,
        ));
    (root, component)
}

/// Value set enumerating LOINC codes
pub fn enumerated_value_set(name: &str, codes: &[&str]) -> Artifact {
    Artifact::new("ValueSet", name, format!("http://x.org/ValueSet/{}", name))
        .with_version("1.0.0")
        .with_status(ArtifactStatus::Active)
        .with_compose(Compose {
            include: vec![ConceptSet {
                system: Some("http://loinc.org".to_string()),
                concept: codes
                    .iter()
                    .map(|code| ConceptReference {
                        code: code.to_string(),
                        display: None,
                    })
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        })
}

/// Value set including other value sets by url
pub fn grouping_value_set(name: &str, children: &[&str]) -> Artifact {
    Artifact::new("ValueSet", name, format!("http://x.org/ValueSet/{}", name))
        .with_version("1.0.0")
        .with_status(ArtifactStatus::Active)
        .with_compose(Compose {
            include: children
                .iter()
                .map(|child| ConceptSet {
                    value_set: vec![format!("http://x.org/ValueSet/{}", child)],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
}

/// Resource with the given url in a response bundle
pub fn entry_resource<'a>(bundle: &'a Value, url: &str) -> Option<&'a Value> {
    bundle["entry"]
        .as_array()?
        .iter()
        .map(|e| &e["resource"])
        .find(|r| r["url"] == url)
}
