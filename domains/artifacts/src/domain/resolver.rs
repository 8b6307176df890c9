//! Dependency graph resolution
//!
//! Depth-first walk over an artifact's component and dependency edges. Every url is
//! visited at most once per traversal context, so cyclic graphs terminate and the
//! first visit of a url wins. Urls in the root's owned closure are only entered through
//! owned edges, so a component the root owns is never first resolved as someone
//! else's dependency.
//!
//! Edges without a pinned version are resolved to a concrete artifact:
//! - owned components: latest version of any status
//! - value sets, when asked to: latest non-draft version on the terminology server
//! - anything else: latest active version, else latest non-draft version
//!
//! Value sets and code systems the repository does not hold are looked up on the
//! terminology endpoint. An owned component that cannot be found is an internal error;
//! any other unresolvable edge is recorded and skipped.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crmi_common::canonical;
use crmi_common::{Error, Result};
use crmi_domain::extensions::KNOWLEDGE_CAPABILITY_URL;
use crmi_domain::{selection, Artifact, Endpoint, HasExtensions};
use crmi_terminology::TerminologyClient;

use super::traversal::TraversalContext;
use super::version_policy::VersionPolicy;
use crate::repository::RepositoryGateway;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a node was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Root,
    Component,
    Dependency,
}

/// One artifact of a resolved graph
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArtifact {
    pub artifact: Artifact,
    pub kind: EdgeKind,
    /// Lifecycle-bound to the root: the root itself, or reached only through owned edges
    pub owned: bool,
    /// Found on the terminology server rather than in the repository
    pub from_terminology: bool,
    /// Reference of the edge that led here; `None` for the root
    pub reference: Option<String>,
}

impl ResolvedArtifact {
    pub fn root(artifact: Artifact) -> Self {
        Self {
            artifact,
            kind: EdgeKind::Root,
            owned: true,
            from_terminology: false,
            reference: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind == EdgeKind::Root
    }
}

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Capabilities every packaged artifact must declare
    pub capabilities: Vec<String>,
    pub policy: VersionPolicy,
    /// Resolve unpinned value sets against the terminology server
    pub latest_from_tx_server: bool,
    pub terminology_endpoint: Option<Endpoint>,
    /// Follow owned component edges only
    pub owned_only: bool,
}

impl WalkOptions {
    /// Walk over owned components only
    pub fn owned_components() -> Self {
        Self {
            owned_only: true,
            ..Self::default()
        }
    }
}

struct Edge {
    reference: String,
    kind: EdgeKind,
    owned: bool,
}

fn edges(artifact: &Artifact, owned_only: bool) -> Vec<Edge> {
    let mut edges: Vec<Edge> = artifact
        .components()
        .filter(|c| !owned_only || c.is_owned())
        .filter_map(|c| {
            c.reference().map(|reference| Edge {
                reference: reference.to_string(),
                kind: EdgeKind::Component,
                owned: c.is_owned(),
            })
        })
        .collect();
    if owned_only {
        return edges;
    }
    for reference in artifact.dependencies() {
        let url = canonical::url_part(&reference);
        if edges.iter().any(|e| canonical::url_part(&e.reference) == url) {
            continue;
        }
        edges.push(Edge {
            reference,
            kind: EdgeKind::Dependency,
            owned: false,
        });
    }
    edges
}

/// Whether the artifact's declared capabilities cover every requested one.
///
/// Artifacts that declare no capabilities are not filtered.
fn supports_capabilities(artifact: &Artifact, requested: &[String]) -> bool {
    if requested.is_empty() || !artifact.has_extension(KNOWLEDGE_CAPABILITY_URL) {
        return true;
    }
    let declared: Vec<&str> = artifact
        .extensions_by_url(KNOWLEDGE_CAPABILITY_URL)
        .filter_map(|e| e.text_value())
        .collect();
    requested.iter().all(|c| declared.contains(&c.as_str()))
}

fn is_terminology_reference(reference: &str) -> bool {
    matches!(
        canonical::resource_type_of(reference),
        Some("ValueSet") | Some("CodeSystem")
    )
}

/// Resolves references and walks artifact graphs.
#[derive(Clone)]
pub struct DependencyResolver {
    repository: Arc<dyn RepositoryGateway>,
    terminology: Arc<dyn TerminologyClient>,
}

impl DependencyResolver {
    pub fn new(
        repository: Arc<dyn RepositoryGateway>,
        terminology: Arc<dyn TerminologyClient>,
    ) -> Self {
        Self {
            repository,
            terminology,
        }
    }

    /// Latest stored version of a reference, any status
    pub async fn latest(&self, reference: &str) -> Result<Option<Artifact>> {
        let found = self.repository.search(reference, None).await?;
        Ok(selection::latest(&found).cloned())
    }

    /// Resolve a reference to a concrete artifact.
    ///
    /// Returns the artifact and whether it came from the terminology server.
    pub async fn resolve(
        &self,
        reference: &str,
        owned: bool,
        options: &WalkOptions,
        ctx: &mut TraversalContext,
    ) -> Result<Option<(Artifact, bool)>> {
        let pinned = canonical::version_part(reference).is_some();

        if owned || pinned {
            if let Some(found) = self.latest(reference).await? {
                return Ok(Some((found, false)));
            }
            if owned {
                return Ok(None);
            }
        } else {
            if options.latest_from_tx_server
                && canonical::resource_type_of(reference) == Some("ValueSet")
            {
                if let Some(endpoint) = &options.terminology_endpoint {
                    match self
                        .terminology
                        .get_latest_non_draft_resource(endpoint, reference)
                        .await
                    {
                        Ok(Some(found)) => return Ok(Some((found, true))),
                        Ok(None) => {}
                        Err(e) => ctx.warn(format!(
                            "Failed to resolve '{}' on the terminology server: {}",
                            reference, e
                        )),
                    }
                }
            }
            let found = self.repository.search(reference, None).await?;
            if let Some(found) = selection::latest_active_or_non_draft(&found) {
                return Ok(Some((found.clone(), false)));
            }
        }

        if let Some(endpoint) = options
            .terminology_endpoint
            .as_ref()
            .filter(|_| is_terminology_reference(reference))
        {
            match self.terminology.get_resource(endpoint, reference, None).await {
                Ok(Some(found)) => return Ok(Some((found, true))),
                Ok(None) => {}
                Err(e) => ctx.warn(format!(
                    "Failed to fetch '{}' from the terminology server: {}",
                    reference, e
                )),
            }
        }
        Ok(None)
    }

    /// Walk the graph below `root`; the root comes first in the result
    pub async fn walk(
        &self,
        root: Artifact,
        options: &WalkOptions,
        ctx: &mut TraversalContext,
    ) -> Result<Vec<ResolvedArtifact>> {
        let claimed = if options.owned_only {
            HashSet::new()
        } else {
            self.owned_urls(&root, options).await?
        };
        let mut resolved = Vec::new();
        self.visit(ResolvedArtifact::root(root), options, &claimed, ctx, &mut resolved)
            .await?;
        tracing::debug!(
            nodes = resolved.len(),
            unresolved = ctx.unresolved().len(),
            "Dependency walk completed"
        );
        Ok(resolved)
    }

    /// Owned components of `root`, recursively, root first
    pub async fn owned_closure(
        &self,
        root: Artifact,
        ctx: &mut TraversalContext,
    ) -> Result<Vec<Artifact>> {
        Ok(self
            .walk(root, &WalkOptions::owned_components(), ctx)
            .await?
            .into_iter()
            .map(|node| node.artifact)
            .collect())
    }

    /// Urls of the root's owned closure, root excluded
    async fn owned_urls(&self, root: &Artifact, options: &WalkOptions) -> Result<HashSet<String>> {
        let owned = WalkOptions {
            capabilities: options.capabilities.clone(),
            policy: options.policy.clone(),
            ..WalkOptions::owned_components()
        };
        let mut nodes = Vec::new();
        self.visit(
            ResolvedArtifact::root(root.clone()),
            &owned,
            &HashSet::new(),
            &mut TraversalContext::new(),
            &mut nodes,
        )
        .await?;
        Ok(nodes
            .into_iter()
            .filter(|n| !n.is_root())
            .map(|n| n.artifact.url().to_string())
            .collect())
    }

    fn visit<'a>(
        &'a self,
        mut node: ResolvedArtifact,
        options: &'a WalkOptions,
        claimed: &'a HashSet<String>,
        ctx: &'a mut TraversalContext,
        resolved: &'a mut Vec<ResolvedArtifact>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = node.artifact.url().to_string();
            if !ctx.visit(&url) {
                return Ok(());
            }
            if !supports_capabilities(&node.artifact, &options.capabilities) {
                tracing::debug!(url = %url, "Artifact lacks a requested capability; skipped");
                return Ok(());
            }
            options.policy.apply(&mut node.artifact)?;
            tracing::debug!(canonical = %node.artifact.canonical(), kind = ?node.kind, "Visiting");

            let outgoing = edges(&node.artifact, options.owned_only);
            let parent_owned = node.owned;
            let duplicate = resolved.iter().any(|r| {
                r.artifact.url() == node.artifact.url()
                    && r.artifact.version() == node.artifact.version()
            });
            if !duplicate {
                resolved.push(node);
            }

            for edge in outgoing {
                if ctx.is_visited(canonical::url_part(&edge.reference)) {
                    continue;
                }
                let owned = parent_owned && edge.owned;
                if !owned && claimed.contains(canonical::url_part(&edge.reference)) {
                    continue;
                }
                if !owned && canonical::resource_type_of(&edge.reference).is_none() {
                    tracing::debug!(reference = %edge.reference, "No resource type in reference; not followed");
                    continue;
                }

                match self.resolve(&edge.reference, owned, options, ctx).await? {
                    Some((artifact, from_terminology)) => {
                        let child = ResolvedArtifact {
                            artifact,
                            kind: edge.kind,
                            owned,
                            from_terminology,
                            reference: Some(edge.reference),
                        };
                        self.visit(child, options, claimed, ctx, resolved).await?;
                    }
                    None if owned => {
                        return Err(Error::Internal(format!(
                            "Owned resource reference not found: {}",
                            edge.reference
                        )));
                    }
                    None => {
                        tracing::warn!(reference = %edge.reference, "Unresolvable dependency skipped");
                        ctx.record_unresolved(&edge.reference);
                    }
                }
            }
            Ok(())
        })
    }
}
