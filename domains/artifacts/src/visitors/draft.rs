//! `$draft`: start a new version of an active artifact
//!
//! The root and every owned component are cloned as `<version>-draft`. Owned
//! components that already have a draft of that version are adopted, not cloned again,
//! and nothing below an adopted draft is cloned either.
//! Clones get temporary `urn:uuid:` ids; owned references between them are rewritten
//! to the draft canonical.

use std::collections::{HashMap, HashSet};

use crmi_common::canonical;
use crmi_common::version::{draft_version, validate_version};
use crmi_common::{Error, Result};
use crmi_domain::{Artifact, ArtifactStatus, Bundle, BundleEntry, LifecycleEvent};

use super::{require_transition, storage_reference, ArtifactServices, Operation, Visitor};
use crate::domain::parameters::OperationParameters;
use crate::domain::traversal::TraversalContext;

pub struct DraftVisitor {
    services: ArtifactServices,
}

impl DraftVisitor {
    pub fn new(services: ArtifactServices) -> Self {
        Self { services }
    }

    async fn draft_exists(&self, url: &str, draft: &str) -> Result<bool> {
        let found = self
            .services
            .repository
            .search(&format!("{}|{}", url, draft), None)
            .await?;
        Ok(!found.is_empty())
    }
}

/// Turn a stored artifact into a fresh draft of `draft` version
fn draft_clone(mut artifact: Artifact, draft: &str) -> Artifact {
    artifact.strip_release_extensions();
    artifact.approval_date = None;
    artifact.effective_period = None;
    artifact.status = Some(ArtifactStatus::Draft);
    artifact.version = Some(draft.to_string());
    artifact
}

/// Point owned component references at the draft version
fn rewrite_owned_references(artifact: &mut Artifact, owned_urls: &HashSet<String>, draft: &str) {
    for related in artifact.related_artifact.iter_mut() {
        let Some(url) = related
            .reference()
            .map(|r| canonical::url_part(r).to_string())
        else {
            continue;
        };
        if owned_urls.contains(&url) {
            related.resource = Some(format!("{}|{}", url, draft));
        }
    }
}

/// Urls of the closure still to clone: reachable from the root through owned edges
/// without passing an adopted draft
fn cloned_urls(closure: &[Artifact], root: &str, adopted: &HashSet<String>) -> HashSet<String> {
    let by_url: HashMap<&str, &Artifact> = closure.iter().map(|a| (a.url(), a)).collect();
    let mut kept = HashSet::from([root.to_string()]);
    let mut pending = vec![root];
    while let Some(url) = pending.pop() {
        let Some(&artifact) = by_url.get(url) else {
            continue;
        };
        for reference in artifact.owned_components().filter_map(|c| c.reference()) {
            let child = canonical::url_part(reference);
            if adopted.contains(child) || !by_url.contains_key(child) {
                continue;
            }
            if kept.insert(child.to_string()) {
                pending.push(child);
            }
        }
    }
    kept
}

/// Point usage-context references at the temporary ids of drafted resources
fn rewrite_usage_contexts(artifact: &mut Artifact, temporary_ids: &HashMap<String, String>) {
    for context in artifact.use_context.iter_mut() {
        let Some(reference) = context
            .value_reference
            .as_mut()
            .and_then(|r| r.reference.as_mut())
        else {
            continue;
        };
        if let Some(urn) = temporary_ids.get(reference.as_str()) {
            *reference = urn.clone();
        }
    }
}

#[async_trait::async_trait]
impl Visitor for DraftVisitor {
    fn operation(&self) -> Operation {
        Operation::Draft
    }

    async fn visit(&self, artifact: Artifact, parameters: &OperationParameters) -> Result<Bundle> {
        let version = parameters.string("version").unwrap_or_default();
        validate_version(version)?;
        require_transition(&artifact, LifecycleEvent::Draft)?;

        let draft = draft_version(version);
        let url = artifact.url().to_string();
        if self.draft_exists(&url, &draft).await? {
            return Err(Error::PreconditionFailed(format!(
                "A draft of '{}' already exists with version '{}'. Only one draft of a version can exist at a time.",
                url, draft
            )));
        }

        let mut ctx = TraversalContext::new();
        let closure = self
            .services
            .resolver()
            .owned_closure(artifact, &mut ctx)
            .await?;

        let owned_urls: HashSet<String> = closure
            .iter()
            .flat_map(|a| a.owned_components())
            .filter_map(|c| c.reference())
            .map(|r| canonical::url_part(r).to_string())
            .collect();

        let mut adopted = HashSet::new();
        for resource in closure.iter().filter(|a| a.url() != url) {
            if self.draft_exists(resource.url(), &draft).await? {
                tracing::debug!(url = %resource.url(), version = %draft, "Adopting existing draft");
                adopted.insert(resource.url().to_string());
            }
        }
        let kept = cloned_urls(&closure, &url, &adopted);

        let mut clones = Vec::new();
        let mut temporary_ids = HashMap::new();
        for resource in closure {
            if !kept.contains(resource.url()) {
                continue;
            }
            let original = storage_reference(&resource)?;
            let mut clone = draft_clone(resource, &draft);
            let urn = clone.assign_temporary_id().to_string();
            temporary_ids.insert(original, urn);
            clones.push(clone);
        }

        let mut bundle = Bundle::transaction();
        for mut clone in clones {
            rewrite_owned_references(&mut clone, &owned_urls, &draft);
            rewrite_usage_contexts(&mut clone, &temporary_ids);
            bundle.push(BundleEntry::create(clone));
        }
        tracing::info!(url = %url, version = %draft, resources = bundle.len(), "Creating draft");
        Ok(self.services.repository.transaction(bundle).await?)
    }
}
