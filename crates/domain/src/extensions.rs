//! Well-known extension urls and codes used by the lifecycle operations

/// Marks a `composed-of` related artifact as owned by its parent
pub const IS_OWNED_URL: &str = "http://hl7.org/fhir/StructureDefinition/artifact-isOwned";

/// Human-readable label attached on release
pub const RELEASE_LABEL_URL: &str = "http://hl7.org/fhir/StructureDefinition/artifact-releaseLabel";

/// Release notes attached on release
pub const RELEASE_DESCRIPTION_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/artifact-releaseDescription";

/// Terminology service that owns a value set's definition
pub const AUTHORITATIVE_SOURCE_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/valueset-authoritativeSource";

/// Reference to the expansion parameters of a manifest
pub const EXPANSION_PARAMETERS_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/cqf-expansionParameters";

/// Capabilities a knowledge artifact requires of its consumer
pub const KNOWLEDGE_CAPABILITY_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/cqf-knowledgeCapability";

/// Messages produced while building a package
pub const MESSAGES_URL: &str = "http://hl7.org/fhir/StructureDefinition/cqf-messages";

/// Role of a dependency within a manifest (key, test, example, ...)
pub const DEPENDENCY_ROLE_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/crmi-dependencyRole";

/// Default assessment type for approvals
pub const DEFAULT_ASSESSMENT_TYPE: &str = "comment";
