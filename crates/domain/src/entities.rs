//! Resource entities for knowledge artifacts
//!
//! The structures follow the FHIR JSON shape closely enough to round-trip through a
//! repository without losing data: every struct keeps unrecognised members in a
//! flattened `other` map.

use chrono::{DateTime, NaiveDate, Utc};
use crmi_common::canonical::{self, Canonical};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::extensions::{IS_OWNED_URL, RELEASE_DESCRIPTION_URL, RELEASE_LABEL_URL};

// ============================================================================
// Status
// ============================================================================

/// Publication status of a knowledge artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Draft,
    Active,
    Retired,
    Unknown,
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Retired => write!(f, "retired"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ============================================================================
// Datatypes
// ============================================================================

/// Time range; bounds are kept as the FHIR dateTime strings they were authored with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Period {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl Period {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    pub fn to(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            display: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// An extension; only the value types the engine reads are typed, the rest is preserved
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_canonical: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_reference: Option<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Extension {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_string(url: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value_string: Some(value.into()),
            ..Self::new(url)
        }
    }

    pub fn with_boolean(url: impl Into<String>, value: bool) -> Self {
        Self {
            value_boolean: Some(value),
            ..Self::new(url)
        }
    }

    pub fn with_code(url: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value_code: Some(value.into()),
            ..Self::new(url)
        }
    }

    pub fn with_markdown(url: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value_markdown: Some(value.into()),
            ..Self::new(url)
        }
    }

    /// First string-like value carried by the extension
    pub fn text_value(&self) -> Option<&str> {
        self.value_string
            .as_deref()
            .or(self.value_code.as_deref())
            .or(self.value_canonical.as_deref())
            .or(self.value_uri.as_deref())
            .or(self.value_markdown.as_deref())
            .or_else(|| {
                self.value_reference
                    .as_ref()
                    .and_then(|r| r.reference.as_deref())
            })
    }
}

/// Read-only access to an extension list
pub trait HasExtensions {
    fn extensions(&self) -> &[Extension];

    fn extension(&self, url: &str) -> Option<&Extension> {
        self.extensions().iter().find(|e| e.url == url)
    }

    fn extensions_by_url<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a Extension> + 'a {
        self.extensions().iter().filter(move |e| e.url == url)
    }

    fn has_extension(&self, url: &str) -> bool {
        self.extension(url).is_some()
    }
}

// ============================================================================
// Related artifacts
// ============================================================================

/// Relationship kind of a related artifact entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelatedArtifactType {
    DependsOn,
    ComposedOf,
    DerivedFrom,
    Documentation,
    Other(String),
}

impl From<String> for RelatedArtifactType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "depends-on" => Self::DependsOn,
            "composed-of" => Self::ComposedOf,
            "derived-from" => Self::DerivedFrom,
            "documentation" => Self::Documentation,
            _ => Self::Other(value),
        }
    }
}

impl From<RelatedArtifactType> for String {
    fn from(value: RelatedArtifactType) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for RelatedArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DependsOn => write!(f, "depends-on"),
            Self::ComposedOf => write!(f, "composed-of"),
            Self::DerivedFrom => write!(f, "derived-from"),
            Self::Documentation => write!(f, "documentation"),
            Self::Other(other) => write!(f, "{}", other),
        }
    }
}

/// A directed edge from an artifact to another resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedArtifact {
    #[serde(rename = "type")]
    pub kind: RelatedArtifactType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl RelatedArtifact {
    pub fn new(kind: RelatedArtifactType, resource: impl Into<String>) -> Self {
        Self {
            kind,
            resource: Some(resource.into()),
            display: None,
            label: None,
            extension: Vec::new(),
            other: Map::new(),
        }
    }

    pub fn depends_on(resource: impl Into<String>) -> Self {
        Self::new(RelatedArtifactType::DependsOn, resource)
    }

    /// A `composed-of` entry, marked owned when requested
    pub fn component(resource: impl Into<String>, owned: bool) -> Self {
        let mut component = Self::new(RelatedArtifactType::ComposedOf, resource);
        if owned {
            component
                .extension
                .push(Extension::with_boolean(IS_OWNED_URL, true));
        }
        component
    }

    pub fn reference(&self) -> Option<&str> {
        self.resource.as_deref().filter(|r| !r.is_empty())
    }

    pub fn is_component(&self) -> bool {
        self.kind == RelatedArtifactType::ComposedOf
    }

    pub fn is_dependency(&self) -> bool {
        self.kind == RelatedArtifactType::DependsOn
    }

    /// Owned components are lifecycle-bound to their parent
    pub fn is_owned(&self) -> bool {
        self.is_component() && self.has_extension(IS_OWNED_URL)
    }
}

impl HasExtensions for RelatedArtifact {
    fn extensions(&self) -> &[Extension] {
        &self.extension
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageContext {
    pub code: Coding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_codeable_concept: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_reference: Option<Reference>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

// ============================================================================
// Value set compose / expansion
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptReference {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// One include (or exclude) clause of a value set compose
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<ConceptReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_set: Vec<String>,
}

/// Shape of a value set compose, deciding how it can be expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeKind {
    /// Code-system includes that enumerate their concepts
    Simple,
    /// Includes that only reference other value sets
    Grouping,
    /// Anything else; needs a terminology server
    Complex,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Compose {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<ConceptSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ConceptSet>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Compose {
    pub fn kind(&self) -> ComposeKind {
        if !self.exclude.is_empty() || self.include.is_empty() {
            return ComposeKind::Complex;
        }
        let simple = self.include.iter().all(|include| {
            include.filter.is_empty()
                && include.value_set.is_empty()
                && include.system.is_some()
                && !include.concept.is_empty()
        });
        if simple {
            return ComposeKind::Simple;
        }
        let grouping = self
            .include
            .iter()
            .all(|include| !include.value_set.is_empty() && include.filter.is_empty());
        if grouping {
            ComposeKind::Grouping
        } else {
            ComposeKind::Complex
        }
    }

    /// Distinct value sets referenced by includes, in declaration order
    pub fn included_value_sets(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for reference in self.include.iter().flat_map(|i| i.value_set.iter()) {
            if !seen.contains(&reference.as_str()) {
                seen.push(reference.as_str());
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionParameter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_uri: Option<String>,
}

/// One code in an expansion
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpansionContains {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Name of the expansion parameter flagging a locally computed expansion
pub const NAIVE_PARAMETER: &str = "naive";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expansion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter: Vec<ExpansionParameter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<ExpansionContains>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Expansion {
    /// Empty expansion stamped with the given time
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp.to_rfc3339()),
            ..Default::default()
        }
    }

    pub fn is_naive(&self) -> bool {
        self.parameter
            .iter()
            .any(|p| p.name == NAIVE_PARAMETER && p.value_boolean.unwrap_or(false))
    }

    pub fn mark_naive(&mut self) {
        if !self.is_naive() {
            self.parameter.push(ExpansionParameter {
                name: NAIVE_PARAMETER.to_string(),
                value_boolean: Some(true),
                ..Default::default()
            });
        }
    }
}

// ============================================================================
// Artifact
// ============================================================================

/// Network address of a terminology service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
}

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// A canonically identified, versioned resource.
///
/// Value-set specific members (`compose`, `expansion`) are empty on other resource types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ArtifactStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "fhir_datetime"
    )]
    pub date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_period: Option<Period>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub use_context: Vec<UsageContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_artifact: Vec<RelatedArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<Compose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<Expansion>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Artifact {
    /// Create a new artifact with the given type, id and url
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: Some(id.into()),
            extension: Vec::new(),
            url: Some(url.into()),
            version: None,
            name: None,
            title: None,
            status: None,
            experimental: None,
            date: None,
            approval_date: None,
            effective_period: None,
            use_context: Vec::new(),
            related_artifact: Vec::new(),
            compose: None,
            expansion: None,
            other: Map::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_status(mut self, status: ArtifactStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_approval_date(mut self, date: NaiveDate) -> Self {
        self.approval_date = Some(date);
        self
    }

    pub fn with_related_artifact(mut self, related: RelatedArtifact) -> Self {
        self.related_artifact.push(related);
        self
    }

    pub fn with_compose(mut self, compose: Compose) -> Self {
        self.compose = Some(compose);
        self
    }

    pub fn with_experimental(mut self, experimental: bool) -> Self {
        self.experimental = Some(experimental);
        self
    }

    /// Give the artifact a fresh `urn:uuid:` id for use inside a transaction bundle
    pub fn assign_temporary_id(&mut self) -> &str {
        self.id = Some(format!("urn:uuid:{}", Uuid::new_v4()));
        self.id.as_deref().unwrap_or_default()
    }

    pub fn has_temporary_id(&self) -> bool {
        self.id.as_deref().is_some_and(|id| id.starts_with("urn:uuid:"))
    }

    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or_default()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref().filter(|v| !v.is_empty())
    }

    pub fn has_version(&self) -> bool {
        self.version().is_some()
    }

    /// `url|version` identity of the artifact
    pub fn canonical(&self) -> Canonical {
        Canonical::from_parts(self.url(), self.version())
    }

    /// `Type/id` storage reference, when the artifact has an id
    pub fn reference(&self) -> Option<String> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| format!("{}/{}", self.resource_type, id))
    }

    pub fn status(&self) -> ArtifactStatus {
        self.status.unwrap_or(ArtifactStatus::Unknown)
    }

    pub fn is_experimental(&self) -> bool {
        self.experimental.unwrap_or(false)
    }

    pub fn is_value_set(&self) -> bool {
        self.resource_type == "ValueSet"
    }

    /// `composed-of` entries
    pub fn components(&self) -> impl Iterator<Item = &RelatedArtifact> {
        self.related_artifact.iter().filter(|ra| ra.is_component())
    }

    /// `composed-of` entries carrying the ownership extension
    pub fn owned_components(&self) -> impl Iterator<Item = &RelatedArtifact> {
        self.related_artifact.iter().filter(|ra| ra.is_owned())
    }

    /// References this artifact depends on without owning them.
    ///
    /// Value sets additionally depend on every value set their compose includes.
    pub fn dependencies(&self) -> Vec<String> {
        let mut dependencies: Vec<String> = self
            .related_artifact
            .iter()
            .filter(|ra| ra.is_dependency())
            .filter_map(|ra| ra.reference().map(str::to_string))
            .collect();
        if let Some(compose) = &self.compose {
            for reference in compose.included_value_sets() {
                if !dependencies.iter().any(|d| d == reference) {
                    dependencies.push(reference.to_string());
                }
            }
        }
        dependencies
    }

    /// Component and dependency references together, components first
    pub fn components_and_dependencies(&self) -> Vec<String> {
        let mut references: Vec<String> = self
            .components()
            .filter_map(|c| c.reference().map(str::to_string))
            .collect();
        for dependency in self.dependencies() {
            if !references.contains(&dependency) {
                references.push(dependency);
            }
        }
        references
    }

    /// Whether a related-artifact reference points to one of this artifact's owned components
    pub fn owns(&self, reference: &str) -> bool {
        let url = canonical::url_part(reference);
        self.owned_components()
            .filter_map(|c| c.reference())
            .any(|r| canonical::url_part(r) == url)
    }

    /// Replace every extension with the same url
    pub fn set_extension(&mut self, extension: Extension) {
        self.extension.retain(|e| e.url != extension.url);
        self.extension.push(extension);
    }

    pub fn add_extension(&mut self, extension: Extension) {
        self.extension.push(extension);
    }

    pub fn remove_extensions(&mut self, url: &str) {
        self.extension.retain(|e| e.url != url);
    }

    /// Drop extensions that only make sense on a released artifact
    pub fn strip_release_extensions(&mut self) {
        self.remove_extensions(RELEASE_LABEL_URL);
        self.remove_extensions(RELEASE_DESCRIPTION_URL);
    }
}

impl HasExtensions for Artifact {
    fn extensions(&self) -> &[Extension] {
        &self.extension
    }
}

/// FHIR `dateTime` (de)serialization.
///
/// Accepts full instants as well as the partial forms `YYYY-MM-DD`, `YYYY-MM` and `YYYY`,
/// which are read as the first instant they cover.
pub mod fhir_datetime {
    use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(instant) => {
                serializer.serialize_str(&instant.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|raw| parse(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return Ok(instant.with_timezone(&Utc));
        }
        let padded = match raw.len() {
            4 => format!("{}-01-01", raw),
            7 => format!("{}-01", raw),
            _ => raw.to_string(),
        };
        NaiveDate::parse_from_str(&padded, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| format!("invalid FHIR dateTime '{}'", raw))
    }
}
