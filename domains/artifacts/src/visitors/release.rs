//! `$release`: turn an approved draft into an active version
//!
//! The root and its owned components become active at the release version. Every
//! other reachable artifact is pinned to a concrete version, and the root's
//! `depends-on` entries are rebuilt from the result. Extensions authored on the old
//! entries are carried over to the new ones.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::Utc;
use crmi_common::canonical;
use crmi_common::version::{strip_draft_suffix, validate_version};
use crmi_common::{Error, Result};
use crmi_domain::extensions::RELEASE_LABEL_URL;
use crmi_domain::{
    Artifact, ArtifactAssessment, ArtifactStateMachine, ArtifactStatus, Bundle, BundleEntry,
    Endpoint, Extension, LifecycleEvent, Period, RelatedArtifact, RelatedArtifactType,
};

use super::{log_messages, require_transition, ArtifactServices, Operation, Visitor};
use crate::domain::parameters::OperationParameters;
use crate::domain::resolver::{EdgeKind, ResolvedArtifact, WalkOptions};
use crate::domain::traversal::TraversalContext;

/// How the release version relates to the version already on the draft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBehavior {
    /// Keep the draft's version, use the requested one only when there is none
    Default,
    /// Fail unless the draft's version equals the requested one
    Check,
    /// Always use the requested version
    Force,
}

impl FromStr for VersionBehavior {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Self::Default),
            "check" => Ok(Self::Check),
            "force" => Ok(Self::Force),
            other => Err(Error::Unprocessable(format!(
                "Invalid versionBehavior '{}'. Valid values are 'default', 'check', 'force'.",
                other
            ))),
        }
    }
}

/// What to do when an experimental artifact is released as part of a non-experimental one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentalPolicy {
    None,
    Warn,
    Error,
}

impl FromStr for ExperimentalPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(Error::Unprocessable(format!(
                "Invalid requireNonExperimental '{}'. Valid values are 'none', 'warn', 'error'.",
                other
            ))),
        }
    }
}

/// Version the root is released as
pub fn release_version(
    existing: Option<&str>,
    requested: &str,
    behavior: VersionBehavior,
) -> Result<String> {
    let Some(existing) = existing.map(strip_draft_suffix) else {
        return Ok(requested.to_string());
    };
    match behavior {
        VersionBehavior::Default => Ok(existing.to_string()),
        VersionBehavior::Force => Ok(requested.to_string()),
        VersionBehavior::Check if existing == requested => Ok(existing.to_string()),
        VersionBehavior::Check => Err(Error::PreconditionFailed(format!(
            "versionBehavior is 'check' but the artifact version '{}' does not match the requested version '{}'",
            existing, requested
        ))),
    }
}

struct ReleaseRequest {
    version: String,
    behavior: VersionBehavior,
    label: Option<String>,
    experimental: ExperimentalPolicy,
    latest_from_tx_server: bool,
    endpoint: Option<Endpoint>,
}

impl ReleaseRequest {
    fn from_parameters(
        parameters: &OperationParameters,
        root: &Artifact,
        default_endpoint: Option<&Endpoint>,
    ) -> Result<Self> {
        let latest_from_tx_server = parameters.flag("latestFromTxServer")?;
        let endpoint = parameters
            .endpoint("terminologyEndpoint")
            .or_else(|| default_endpoint.cloned());
        if latest_from_tx_server && endpoint.is_none() {
            return Err(Error::Unprocessable(
                "latestFromTxServer = true but no terminologyEndpoint is available".to_string(),
            ));
        }

        let version = parameters
            .string("version")
            .ok_or_else(|| Error::Unprocessable("Version must be present".to_string()))?;
        let behavior = parameters
            .string("versionBehavior")
            .ok_or_else(|| {
                Error::Unprocessable(
                    "'versionBehavior' must be provided as an argument to the $release operation. Valid values are 'default', 'check', 'force'."
                        .to_string(),
                )
            })?
            .parse()?;
        validate_version(version)?;

        let experimental = match parameters.string("requireNonExperimental") {
            Some(_) if root.is_experimental() => ExperimentalPolicy::None,
            Some(value) => value.parse()?,
            None => ExperimentalPolicy::None,
        };

        Ok(Self {
            version: version.to_string(),
            behavior,
            label: parameters.string("releaseLabel").map(str::to_string),
            experimental,
            latest_from_tx_server,
            endpoint,
        })
    }
}

/// Components of the root plus the value sets their value sets include, transitively
fn experimental_scope(nodes: &[ResolvedArtifact]) -> Vec<&Artifact> {
    let mut scope: Vec<&Artifact> = nodes
        .iter()
        .filter(|n| n.kind == EdgeKind::Component)
        .map(|n| &n.artifact)
        .collect();
    let mut next = 0;
    while next < scope.len() {
        let current = scope[next];
        next += 1;
        let Some(compose) = current.compose.as_ref().filter(|_| current.is_value_set()) else {
            continue;
        };
        for reference in compose.included_value_sets() {
            let url = canonical::url_part(reference);
            let Some(child) = nodes.iter().map(|n| &n.artifact).find(|a| a.url() == url) else {
                continue;
            };
            if !scope.iter().any(|a| a.url() == child.url()) {
                scope.push(child);
            }
        }
    }
    scope
}

fn check_non_experimental(nodes: &[ResolvedArtifact], policy: ExperimentalPolicy) -> Result<()> {
    if policy == ExperimentalPolicy::None {
        return Ok(());
    }
    for artifact in experimental_scope(nodes) {
        if !artifact.is_experimental() {
            continue;
        }
        let message = format!(
            "Root artifact is not experimental, but references an experimental resource: {}",
            artifact.canonical()
        );
        if policy == ExperimentalPolicy::Error {
            return Err(Error::Unprocessable(message));
        }
        tracing::warn!(canonical = %artifact.canonical(), "{}", message);
    }
    Ok(())
}

/// Give an owned artifact its released metadata
fn activate(artifact: &mut Artifact, version: &str, effective_period: Option<&Period>) {
    artifact.status = Some(ArtifactStatus::Active);
    artifact.version = Some(version.to_string());
    artifact.date = Some(Utc::now());
    if artifact.effective_period.as_ref().is_none_or(Period::is_empty) {
        artifact.effective_period = effective_period.cloned();
    }
}

/// Point component references at the version each component was released or resolved as
fn pin_components(artifact: &mut Artifact, pinned: &HashMap<String, String>) {
    for related in artifact.related_artifact.iter_mut().filter(|ra| ra.is_component()) {
        let Some(url) = related
            .reference()
            .map(|r| canonical::url_part(r).to_string())
        else {
            continue;
        };
        if let Some(reference) = pinned.get(&url) {
            related.resource = Some(reference.clone());
        }
    }
}

/// New `depends-on` entries for the root: every resolved node, then every unresolved reference
fn manifest(
    dependencies: &[ResolvedArtifact],
    unresolved: &[String],
    original: &[RelatedArtifact],
) -> Vec<RelatedArtifact> {
    let carried = |url: &str| -> Vec<Extension> {
        original
            .iter()
            .find(|ra| ra.reference().map(canonical::url_part) == Some(url))
            .map(|ra| ra.extension.clone())
            .unwrap_or_default()
    };

    let mut entries: Vec<RelatedArtifact> = Vec::new();
    let resolved = dependencies.iter().map(|node| {
        let mut entry = RelatedArtifact::depends_on(node.artifact.canonical().to_string());
        entry.display = node.artifact.title.clone().or_else(|| node.artifact.name.clone());
        entry
    });
    let missing = unresolved.iter().map(|r| RelatedArtifact::depends_on(r.as_str()));
    for mut entry in resolved.chain(missing) {
        let duplicate = entries
            .iter()
            .any(|e| e.reference() == entry.reference() && e.kind == entry.kind);
        if duplicate {
            continue;
        }
        if let Some(url) = entry.reference().map(|r| canonical::url_part(r).to_string()) {
            entry.extension.extend(carried(&url));
        }
        entries.push(entry);
    }
    entries
}

/// PUT for stored resources, POST for those without an id
fn upsert(artifact: Artifact) -> BundleEntry {
    if artifact.reference().is_some() {
        BundleEntry::update(artifact)
    } else {
        BundleEntry::create(artifact)
    }
}

pub struct ReleaseVisitor {
    services: ArtifactServices,
}

impl ReleaseVisitor {
    pub fn new(services: ArtifactServices) -> Self {
        Self { services }
    }

    /// Re-point assessments of the draft at the released canonical
    async fn assessment_updates(&self, draft: &str, version: &str) -> Result<Vec<BundleEntry>> {
        let released = format!("{}|{}", canonical::url_part(draft), version);
        let mut entries = Vec::new();
        for stored in self.services.repository.search_assessments(draft).await? {
            let mut assessment = ArtifactAssessment::from_artifact(&stored)?;
            assessment.set_derived_from(&released);
            entries.push(BundleEntry::update(assessment.into_artifact()?));
        }
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl Visitor for ReleaseVisitor {
    fn operation(&self) -> Operation {
        Operation::Release
    }

    async fn visit(&self, artifact: Artifact, parameters: &OperationParameters) -> Result<Bundle> {
        let request = ReleaseRequest::from_parameters(
            parameters,
            &artifact,
            self.services.default_endpoint.as_ref(),
        )?;
        require_transition(&artifact, LifecycleEvent::Release)?;
        ArtifactStateMachine::release_guard(artifact.date, artifact.approval_date)?;

        let version = release_version(artifact.version(), &request.version, request.behavior)?;
        let url = artifact.url().to_string();
        let draft = artifact.canonical().to_string();
        let original_dependencies: Vec<RelatedArtifact> = artifact
            .related_artifact
            .iter()
            .filter(|ra| ra.is_dependency())
            .cloned()
            .collect();

        let options = WalkOptions {
            latest_from_tx_server: request.latest_from_tx_server,
            terminology_endpoint: request.endpoint.clone(),
            ..WalkOptions::default()
        };
        let mut ctx = TraversalContext::new();
        let mut nodes = self
            .services
            .resolver()
            .walk(artifact, &options, &mut ctx)
            .await?;
        log_messages(&url, &ctx);
        check_non_experimental(&nodes, request.experimental)?;

        let effective_period = nodes.first().and_then(|n| n.artifact.effective_period.clone());
        for node in nodes.iter_mut().filter(|n| n.owned) {
            activate(&mut node.artifact, &version, effective_period.as_ref());
        }
        let pinned: HashMap<String, String> = nodes
            .iter()
            .map(|n| (n.artifact.url().to_string(), n.artifact.canonical().to_string()))
            .collect();
        for node in nodes.iter_mut().filter(|n| n.owned) {
            pin_components(&mut node.artifact, &pinned);
        }

        let (root, dependencies) = nodes
            .split_first_mut()
            .ok_or_else(|| Error::Internal(format!("Release of {} resolved no root", url)))?;
        let root = &mut root.artifact;
        root.related_artifact
            .retain(|ra| ra.kind != RelatedArtifactType::DependsOn);
        root.related_artifact
            .extend(manifest(dependencies, ctx.unresolved(), &original_dependencies));
        if let Some(label) = &request.label {
            root.set_extension(Extension::with_string(RELEASE_LABEL_URL, label.as_str()));
        }

        let mut entries: Vec<BundleEntry> = dependencies
            .iter()
            .filter(|n| n.owned || n.from_terminology || n.kind == EdgeKind::Component)
            .map(|n| upsert(n.artifact.clone()))
            .collect();
        match self.assessment_updates(&draft, &version).await {
            Ok(updates) => entries.extend(updates),
            Err(e) => tracing::warn!(url = %url, error = %e, "Failed to update assessments"),
        }

        tracing::info!(
            url = %url,
            version = %version,
            resources = entries.len() + 1,
            "Releasing artifact"
        );
        let outcome = self
            .services
            .publisher()
            .publish_entries(BundleEntry::update(root.clone()), entries)
            .await?;
        Ok(outcome.response)
    }
}
