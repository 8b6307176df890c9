//! FHIR REST repository gateway
//!
//! - `GET {base}/{type}?url=..&version=..&status=..`, following `next` links across pages
//! - `GET|DELETE {base}/{type}/{id}`, `POST {base}/{type}`
//! - `POST {base}` with a transaction bundle

use std::sync::Arc;
use std::time::Duration;

use crmi_common::canonical;
use crmi_domain::model::ArtifactModel;
use crmi_domain::{Artifact, ArtifactStatus, Bundle, ASSESSMENT_RESOURCE_TYPE};
use reqwest::StatusCode;
use serde_json::Value;

use super::{RepositoryConfig, RepositoryError, RepositoryGateway};

/// Upper bound on followed search pages
const MAX_PAGES: usize = 100;

/// Repository backed by a FHIR server.
pub struct FhirRepository {
    http: reqwest::Client,
    base_url: String,
    model: Arc<dyn ArtifactModel>,
}

impl FhirRepository {
    pub fn new(
        config: RepositoryConfig,
        model: Arc<dyn ArtifactModel>,
    ) -> Result<Self, RepositoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RepositoryError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, RepositoryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read response body".to_string());
        Err(match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => RepositoryError::NotFound(what.to_string()),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                RepositoryError::Conflict(format!("{}: {}", what, body))
            }
            s if s.is_server_error() => {
                RepositoryError::Unavailable(format!("Repository returned {} for {}: {}", s, what, body))
            }
            s => RepositoryError::Response(format!("Repository returned {} for {}: {}", s, what, body)),
        })
    }

    async fn json(response: reqwest::Response) -> Result<Value, RepositoryError> {
        response
            .json()
            .await
            .map_err(|e| RepositoryError::Response(e.to_string()))
    }

    fn parse_artifact(&self, raw: Value) -> Result<Artifact, RepositoryError> {
        self.model
            .parse_artifact(raw)
            .map_err(|e| RepositoryError::Response(e.to_string()))
    }

    /// Follow a search through all of its pages
    async fn search_pages(
        &self,
        first: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Vec<Artifact>, RepositoryError> {
        let mut found = Vec::new();
        let mut request = first;
        for _ in 0..MAX_PAGES {
            let response = request
                .send()
                .await
                .map_err(|e| RepositoryError::Request(e.to_string()))?;
            let raw = Self::json(Self::check(response, what).await?).await?;
            let next = next_link(&raw);
            let page = self
                .model
                .parse_bundle(raw)
                .map_err(|e| RepositoryError::Response(e.to_string()))?;
            found.extend(page.resources().cloned());

            match next {
                Some(url) => request = self.http.get(url),
                None => return Ok(found),
            }
        }
        tracing::warn!(search = %what, pages = MAX_PAGES, "Search paging stopped at the page limit");
        Ok(found)
    }
}

fn next_link(raw: &Value) -> Option<String> {
    raw.get("link")?
        .as_array()?
        .iter()
        .find(|link| link.get("relation").and_then(Value::as_str) == Some("next"))
        .and_then(|link| link.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait::async_trait]
impl RepositoryGateway for FhirRepository {
    async fn search(
        &self,
        reference: &str,
        status: Option<ArtifactStatus>,
    ) -> Result<Vec<Artifact>, RepositoryError> {
        let Some(resource_type) = canonical::resource_type_of(reference) else {
            tracing::debug!(reference = %reference, "No resource type in reference; skipping search");
            return Ok(Vec::new());
        };

        let mut query = vec![("url", canonical::url_part(reference).to_string())];
        if let Some(version) = canonical::version_part(reference) {
            query.push(("version", version.to_string()));
        }
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }

        let url = format!("{}/{}", self.base_url, resource_type);
        let found = self
            .search_pages(self.http.get(&url).query(&query), reference)
            .await?;
        tracing::debug!(reference = %reference, matches = found.len(), "Repository search completed");
        Ok(found)
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Artifact, RepositoryError> {
        let reference = format!("{}/{}", resource_type, id);
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, reference))
            .send()
            .await
            .map_err(|e| RepositoryError::Request(e.to_string()))?;
        let raw = Self::json(Self::check(response, &reference).await?).await?;
        self.parse_artifact(raw)
    }

    async fn create(&self, resource: Artifact) -> Result<Artifact, RepositoryError> {
        let body = self
            .model
            .artifact_to_json(&resource)
            .map_err(|e| RepositoryError::Request(e.to_string()))?;
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, resource.resource_type))
            .json(&body)
            .send()
            .await
            .map_err(|e| RepositoryError::Request(e.to_string()))?;
        let response = Self::check(response, &resource.resource_type).await?;

        let text = response
            .text()
            .await
            .map_err(|e| RepositoryError::Response(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(resource);
        }
        let raw: Value =
            serde_json::from_str(&text).map_err(|e| RepositoryError::Response(e.to_string()))?;
        self.parse_artifact(raw)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), RepositoryError> {
        let reference = format!("{}/{}", resource_type, id);
        let response = self
            .http
            .delete(format!("{}/{}", self.base_url, reference))
            .send()
            .await
            .map_err(|e| RepositoryError::Request(e.to_string()))?;
        Self::check(response, &reference).await?;
        tracing::debug!(reference = %reference, "Resource deleted");
        Ok(())
    }

    async fn transaction(&self, bundle: Bundle) -> Result<Bundle, RepositoryError> {
        let body = self
            .model
            .bundle_to_json(&bundle)
            .map_err(|e| RepositoryError::Request(e.to_string()))?;
        let response = self
            .http
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RepositoryError::Request(e.to_string()))?;
        let raw = Self::json(Self::check(response, "transaction").await?).await?;
        let result = self
            .model
            .parse_bundle(raw)
            .map_err(|e| RepositoryError::Response(e.to_string()))?;
        tracing::debug!(entries = bundle.len(), "Transaction committed");
        Ok(result)
    }

    async fn search_assessments(&self, canonical: &str) -> Result<Vec<Artifact>, RepositoryError> {
        let request = self
            .http
            .get(format!("{}/{}", self.base_url, ASSESSMENT_RESOURCE_TYPE))
            .query(&[("artifact", canonical)]);
        self.search_pages(request, canonical).await
    }
}
