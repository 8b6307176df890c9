//! FHIR Terminology HTTP Client Implementation
//!
//! Talks to a FHIR terminology server:
//! - `POST {address}/ValueSet/$expand` with a `Parameters` body
//! - `GET {address}/{type}?url=..[&version=..]` for resource lookup

use std::sync::Arc;
use std::time::Duration;

use crmi_common::canonical;
use crmi_domain::model::{ArtifactModel, FhirVersion};
use crmi_domain::{selection, Artifact, Endpoint};
use serde_json::{json, Value};

use crate::{TerminologyClient, TerminologyConfig, TerminologyError};

/// Real FHIR terminology client.
pub struct FhirTerminologyClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: Arc<dyn ArtifactModel>,
}

impl FhirTerminologyClient {
    /// Create a new terminology client from configuration.
    pub fn new(
        config: TerminologyConfig,
        model: Arc<dyn ArtifactModel>,
    ) -> Result<Self, TerminologyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TerminologyError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            api_key: config.api_key,
            model,
        })
    }

    fn base(endpoint: &Endpoint) -> &str {
        endpoint.address.trim_end_matches('/')
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// `$expand` parameters with `url` and `valueSetVersion` filled in when absent
    fn expansion_parameters(&self, value_set: &Artifact, parameters: Option<&Value>) -> Value {
        let mut body = parameters
            .filter(|p| p.is_object())
            .cloned()
            .unwrap_or_else(|| json!({"resourceType": "Parameters"}));
        let mut entries = body
            .get("parameter")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let has = |entries: &[Value], name: &str| {
            entries
                .iter()
                .any(|p| p.get("name").and_then(Value::as_str) == Some(name))
        };

        if !has(&entries, "url") {
            let url_type = match self.model.fhir_version() {
                FhirVersion::Dstu3 => "valueUri",
                FhirVersion::R4 => "valueUrl",
            };
            entries.push(json!({"name": "url", url_type: value_set.url()}));
        }
        if let Some(version) = value_set.version() {
            if !has(&entries, "valueSetVersion") {
                entries.push(json!({"name": "valueSetVersion", "valueString": version}));
            }
        }
        body["parameter"] = Value::Array(entries);
        body
    }

    async fn search(
        &self,
        endpoint: &Endpoint,
        reference: &str,
        extra: &[(&str, &str)],
    ) -> Result<Vec<Artifact>, TerminologyError> {
        let resource_type = canonical::resource_type_of(reference).unwrap_or("ValueSet");
        let url = format!("{}/{}", Self::base(endpoint), resource_type);
        let mut query = vec![("url", canonical::url_part(reference))];
        query.extend_from_slice(extra);

        let response = self
            .authorize(self.http.get(&url).query(&query))
            .send()
            .await
            .map_err(|e| TerminologyError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read response body".to_string());
            return Err(TerminologyError::Response(format!(
                "Terminology server returned {}: {}",
                status, body
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| TerminologyError::Response(e.to_string()))?;
        let bundle = self
            .model
            .parse_bundle(raw)
            .map_err(|e| TerminologyError::Response(e.to_string()))?;

        tracing::debug!(
            reference = %reference,
            matches = bundle.len(),
            "Terminology search completed"
        );
        Ok(bundle.resources().cloned().collect())
    }
}

#[async_trait::async_trait]
impl TerminologyClient for FhirTerminologyClient {
    async fn expand(
        &self,
        value_set: &Artifact,
        endpoint: &Endpoint,
        parameters: Option<&Value>,
    ) -> Result<Artifact, TerminologyError> {
        let url = format!("{}/ValueSet/$expand", Self::base(endpoint));
        let body = self.expansion_parameters(value_set, parameters);

        let response = self
            .authorize(self.http.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| TerminologyError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read response body".to_string());
            return Err(TerminologyError::Response(format!(
                "Terminology server returned {} for $expand of {}: {}",
                status,
                value_set.url(),
                body
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| TerminologyError::Response(e.to_string()))?;
        let expanded = self
            .model
            .parse_artifact(raw)
            .map_err(|e| TerminologyError::Response(e.to_string()))?;

        if expanded.expansion.is_none() {
            return Err(TerminologyError::Response(format!(
                "Terminology server returned no expansion for {}",
                value_set.url()
            )));
        }

        tracing::debug!(url = %value_set.url(), "Value set expanded by terminology server");
        Ok(expanded)
    }

    async fn get_resource(
        &self,
        endpoint: &Endpoint,
        reference: &str,
        version: Option<&str>,
    ) -> Result<Option<Artifact>, TerminologyError> {
        let version = version.or_else(|| canonical::version_part(reference));
        let candidates = match version {
            Some(version) => self.search(endpoint, reference, &[("version", version)]).await?,
            None => self.search(endpoint, reference, &[]).await?,
        };
        let found = match version {
            Some(version) => candidates
                .iter()
                .find(|c| c.version() == Some(version))
                .cloned(),
            None => selection::latest(&candidates).cloned(),
        };
        Ok(found)
    }

    async fn get_latest_non_draft_resource(
        &self,
        endpoint: &Endpoint,
        reference: &str,
    ) -> Result<Option<Artifact>, TerminologyError> {
        let candidates = self
            .search(endpoint, reference, &[("status:not", "draft")])
            .await?;
        Ok(selection::latest_non_draft(&candidates).cloned())
    }
}
