//! Version-specific artifact models
//!
//! Lifecycle and graph logic is written once against [`Artifact`]. An [`ArtifactModel`]
//! translates between that representation and the JSON of one FHIR release, and knows
//! which resource types that release classifies as knowledge, canonical, conformance,
//! or terminology resources.

use std::str::FromStr;
use std::sync::Arc;

use crmi_common::{Error, Result};
use serde_json::{json, Value};

use crate::bundle::Bundle;
use crate::entities::{Artifact, HasExtensions};

/// Supported FHIR releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FhirVersion {
    Dstu3,
    R4,
}

impl FromStr for FhirVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "R4" | "4.0.1" | "4.0.0" => Ok(Self::R4),
            "DSTU3" | "STU3" | "3.0.2" | "3.0.1" => Ok(Self::Dstu3),
            other => Err(Error::Unprocessable(format!(
                "Unsupported FHIR version: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dstu3 => write!(f, "DSTU3"),
            Self::R4 => write!(f, "R4"),
        }
    }
}

/// Translation between a FHIR release's JSON and the engine's artifact representation
pub trait ArtifactModel: Send + Sync {
    fn fhir_version(&self) -> FhirVersion;

    /// Rewrite a resource from this release's JSON into the engine's shape
    fn upgrade(&self, raw: Value) -> Result<Value>;

    /// Rewrite a resource from the engine's shape into this release's JSON
    fn downgrade(&self, value: Value) -> Result<Value>;

    fn knowledge_types(&self) -> &'static [&'static str];

    fn canonical_types(&self) -> &'static [&'static str];

    fn conformance_types(&self) -> &'static [&'static str];

    fn terminology_types(&self) -> &'static [&'static str];

    fn parse_artifact(&self, raw: Value) -> Result<Artifact> {
        Ok(serde_json::from_value(self.upgrade(raw)?)?)
    }

    fn artifact_to_json(&self, artifact: &Artifact) -> Result<Value> {
        self.downgrade(serde_json::to_value(artifact)?)
    }

    fn parse_bundle(&self, mut raw: Value) -> Result<Bundle> {
        map_entry_resources(&mut raw, |resource| self.upgrade(resource))?;
        Ok(serde_json::from_value(raw)?)
    }

    fn bundle_to_json(&self, bundle: &Bundle) -> Result<Value> {
        let mut raw = serde_json::to_value(bundle)?;
        map_entry_resources(&mut raw, |resource| self.downgrade(resource))?;
        Ok(raw)
    }

    /// Whether the resource type may carry a canonical url in this release
    fn is_canonical_type(&self, resource_type: &str) -> bool {
        self.canonical_types().contains(&resource_type)
    }

    /// Whether the artifact belongs to a package `include` category
    ///
    /// Unrecognised categories are treated as resource type names.
    fn in_category(&self, artifact: &Artifact, category: &str) -> bool {
        let resource_type = artifact.resource_type.as_str();
        match category {
            "all" => true,
            "knowledge" => self.knowledge_types().contains(&resource_type),
            "canonical" => self.canonical_types().contains(&resource_type),
            "conformance" => self.conformance_types().contains(&resource_type),
            "terminology" => self.terminology_types().contains(&resource_type),
            "tests" => is_test_case(artifact),
            "examples" => has_true_flag(artifact, "isExample"),
            other => other == resource_type,
        }
    }
}

fn map_entry_resources(
    raw: &mut Value,
    mut convert: impl FnMut(Value) -> Result<Value>,
) -> Result<()> {
    if let Some(entries) = raw.get_mut("entry").and_then(Value::as_array_mut) {
        for entry in entries {
            if let Some(resource) = entry.get_mut("resource") {
                let converted = convert(resource.take())?;
                *resource = converted;
            }
        }
    }
    Ok(())
}

fn is_test_case(artifact: &Artifact) -> bool {
    let library_test_case = artifact.resource_type == "Library"
        && artifact
            .other
            .get("type")
            .and_then(|t| t.get("coding"))
            .and_then(Value::as_array)
            .is_some_and(|codings| {
                codings
                    .iter()
                    .any(|c| c.get("code").and_then(Value::as_str) == Some("test-case"))
            });
    library_test_case || has_true_flag(artifact, "isTestCase")
}

fn has_true_flag(artifact: &Artifact, url_fragment: &str) -> bool {
    artifact
        .extensions()
        .iter()
        .any(|e| e.url.contains(url_fragment) && e.value_boolean == Some(true))
}

fn ensure_resource(raw: &Value) -> Result<()> {
    if raw.get("resourceType").and_then(Value::as_str).is_none() {
        return Err(Error::Unprocessable(
            "resource is missing resourceType".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// R4
// ============================================================================

/// FHIR R4; the engine's representation is R4-shaped, so translation is a validation pass
#[derive(Debug, Clone, Copy, Default)]
pub struct R4Model;

const R4_KNOWLEDGE: &[&str] = &["Library", "Measure", "ActivityDefinition", "PlanDefinition"];

const R4_CANONICAL: &[&str] = &[
    "ActivityDefinition",
    "CapabilityStatement",
    "ChargeItemDefinition",
    "CompartmentDefinition",
    "ConceptMap",
    "EffectEvidenceSynthesis",
    "EventDefinition",
    "Evidence",
    "EvidenceVariable",
    "ExampleScenario",
    "GraphDefinition",
    "ImplementationGuide",
    "Library",
    "Measure",
    "MessageDefinition",
    "NamingSystem",
    "OperationDefinition",
    "PlanDefinition",
    "Questionnaire",
    "ResearchDefinition",
    "ResearchElementDefinition",
    "RiskEvidenceSynthesis",
    "SearchParameter",
    "StructureDefinition",
    "StructureMap",
    "TerminologyCapabilities",
    "TestScript",
    "ValueSet",
    "CodeSystem",
];

const R4_CONFORMANCE: &[&str] = &[
    "CapabilityStatement",
    "StructureDefinition",
    "ImplementationGuide",
    "SearchParameter",
    "MessageDefinition",
    "OperationDefinition",
    "CompartmentDefinition",
    "StructureMap",
    "GraphDefinition",
    "ExampleScenario",
];

const R4_TERMINOLOGY: &[&str] = &[
    "CodeSystem",
    "ValueSet",
    "ConceptMap",
    "NamingSystem",
    "TerminologyCapabilities",
];

impl ArtifactModel for R4Model {
    fn fhir_version(&self) -> FhirVersion {
        FhirVersion::R4
    }

    fn upgrade(&self, raw: Value) -> Result<Value> {
        ensure_resource(&raw)?;
        Ok(raw)
    }

    fn downgrade(&self, value: Value) -> Result<Value> {
        ensure_resource(&value)?;
        Ok(value)
    }

    fn knowledge_types(&self) -> &'static [&'static str] {
        R4_KNOWLEDGE
    }

    fn canonical_types(&self) -> &'static [&'static str] {
        R4_CANONICAL
    }

    fn conformance_types(&self) -> &'static [&'static str] {
        R4_CONFORMANCE
    }

    fn terminology_types(&self) -> &'static [&'static str] {
        R4_TERMINOLOGY
    }
}

// ============================================================================
// DSTU3
// ============================================================================

/// FHIR DSTU3; `relatedArtifact.resource` is a Reference instead of a canonical string
#[derive(Debug, Clone, Copy, Default)]
pub struct Dstu3Model;

const DSTU3_KNOWLEDGE: &[&str] = &["Library", "Measure", "ActivityDefinition", "PlanDefinition"];

const DSTU3_CANONICAL: &[&str] = &[
    "ActivityDefinition",
    "CapabilityStatement",
    "CompartmentDefinition",
    "ConceptMap",
    "GraphDefinition",
    "ImplementationGuide",
    "Library",
    "Measure",
    "MessageDefinition",
    "NamingSystem",
    "OperationDefinition",
    "PlanDefinition",
    "Questionnaire",
    "SearchParameter",
    "StructureDefinition",
    "StructureMap",
    "TestScript",
    "ValueSet",
    "CodeSystem",
];

const DSTU3_CONFORMANCE: &[&str] = &[
    "CapabilityStatement",
    "StructureDefinition",
    "ImplementationGuide",
    "SearchParameter",
    "MessageDefinition",
    "OperationDefinition",
    "CompartmentDefinition",
    "StructureMap",
    "GraphDefinition",
];

const DSTU3_TERMINOLOGY: &[&str] = &["CodeSystem", "ValueSet", "ConceptMap", "NamingSystem"];

impl Dstu3Model {
    fn related_artifacts_mut(value: &mut Value) -> impl Iterator<Item = &mut Value> {
        value
            .get_mut("relatedArtifact")
            .and_then(Value::as_array_mut)
            .into_iter()
            .flatten()
    }
}

impl ArtifactModel for Dstu3Model {
    fn fhir_version(&self) -> FhirVersion {
        FhirVersion::Dstu3
    }

    fn upgrade(&self, mut raw: Value) -> Result<Value> {
        ensure_resource(&raw)?;
        for related in Self::related_artifacts_mut(&mut raw) {
            let reference = match related.get("resource") {
                Some(Value::Object(reference)) => reference
                    .get("reference")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => continue,
            };
            match reference {
                Some(reference) => related["resource"] = Value::String(reference),
                None => {
                    if let Some(fields) = related.as_object_mut() {
                        fields.remove("resource");
                    }
                }
            }
        }
        Ok(raw)
    }

    fn downgrade(&self, mut value: Value) -> Result<Value> {
        ensure_resource(&value)?;
        for related in Self::related_artifacts_mut(&mut value) {
            if let Some(Value::String(reference)) = related.get("resource") {
                let wrapped = json!({ "reference": reference });
                related["resource"] = wrapped;
            }
        }
        Ok(value)
    }

    fn knowledge_types(&self) -> &'static [&'static str] {
        DSTU3_KNOWLEDGE
    }

    fn canonical_types(&self) -> &'static [&'static str] {
        DSTU3_CANONICAL
    }

    fn conformance_types(&self) -> &'static [&'static str] {
        DSTU3_CONFORMANCE
    }

    fn terminology_types(&self) -> &'static [&'static str] {
        DSTU3_TERMINOLOGY
    }
}

/// Model for the given release
pub fn for_version(version: FhirVersion) -> Arc<dyn ArtifactModel> {
    match version {
        FhirVersion::R4 => Arc::new(R4Model),
        FhirVersion::Dstu3 => Arc::new(Dstu3Model),
    }
}
