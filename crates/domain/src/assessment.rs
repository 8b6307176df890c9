//! Artifact assessments: approvals and comments recorded against an artifact

use chrono::{DateTime, Utc};
use crmi_common::canonical;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entities::{fhir_datetime, Artifact, Reference, RelatedArtifact, RelatedArtifactType};

/// Resource type of assessment records
pub const ASSESSMENT_RESOURCE_TYPE: &str = "ArtifactAssessment";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub information_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_artifact: Vec<RelatedArtifact>,
}

/// Typed view over an `ArtifactAssessment` resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactAssessment {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `url|version` of the assessed artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_canonical: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "fhir_datetime"
    )]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<AssessmentContent>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ArtifactAssessment {
    /// New assessment targeting the given artifact canonical
    pub fn new(artifact_canonical: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            resource_type: ASSESSMENT_RESOURCE_TYPE.to_string(),
            id: None,
            artifact_canonical: Some(artifact_canonical.into()),
            date: Some(date),
            content: Vec::new(),
            other: Map::new(),
        }
    }

    pub fn with_content(mut self, content: AssessmentContent) -> Self {
        self.content.push(content);
        self
    }

    /// Whether the assessment targets the given canonical.
    ///
    /// A `url|version` canonical matches that version only; a bare url matches any version.
    pub fn targets(&self, reference: &str) -> bool {
        let Some(target) = self.artifact_canonical.as_deref() else {
            return false;
        };
        match canonical::version_part(reference) {
            Some(_) => target == reference,
            None => canonical::url_part(target) == reference,
        }
    }

    /// Point the assessment at the released version it now derives from
    pub fn set_derived_from(&mut self, reference: &str) {
        if self.content.is_empty() {
            self.content.push(AssessmentContent::default());
        }
        for content in &mut self.content {
            content
                .related_artifact
                .retain(|ra| ra.kind != RelatedArtifactType::DerivedFrom);
        }
        self.content[0]
            .related_artifact
            .push(RelatedArtifact::new(RelatedArtifactType::DerivedFrom, reference));
    }

    pub fn derived_from(&self) -> Option<&str> {
        self.content
            .iter()
            .flat_map(|c| c.related_artifact.iter())
            .find(|ra| ra.kind == RelatedArtifactType::DerivedFrom)
            .and_then(|ra| ra.reference())
    }

    pub fn into_artifact(self) -> Result<Artifact, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    pub fn from_artifact(artifact: &Artifact) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(artifact)?)
    }
}
