//! Resource model, transaction bundles, and the lifecycle state machine for knowledge artifacts

pub mod assessment;
pub mod bundle;
pub mod entities;
pub mod extensions;
pub mod model;
pub mod selection;
pub mod state;

pub use assessment::{ArtifactAssessment, AssessmentContent, ASSESSMENT_RESOURCE_TYPE};
pub use bundle::{Bundle, BundleEntry, BundleRequest, BundleResponse, BundleType, HttpVerb};
pub use entities::{
    Artifact, ArtifactStatus, Compose, ComposeKind, ConceptReference, ConceptSet, Endpoint,
    Expansion, ExpansionContains, ExpansionParameter, Extension, HasExtensions, Period, Reference,
    RelatedArtifact, RelatedArtifactType,
};
pub use model::{ArtifactModel, Dstu3Model, FhirVersion, R4Model};
pub use state::{ArtifactStateMachine, LifecycleEvent, LifecycleState, StateError};
