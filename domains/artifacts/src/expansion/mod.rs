//! Value set expansion
//!
//! A value set without an expansion is expanded by the first step that applies:
//! 1. a terminology endpoint is available and the value set has no authoritative
//!    source, or that source is the endpoint: the terminology server expands it
//! 2. simple compose (enumerated concepts of code systems): listed locally
//! 3. grouping compose (includes of other value sets): union of the children's codes
//! 4. anything else cannot be expanded
//!
//! A failed server expansion is recorded as a warning and falls through to the local
//! steps. Local expansions are flagged naive.

pub mod cache;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use crmi_common::canonical;
use crmi_common::{Canonical, Error, Result};
use crmi_domain::extensions::AUTHORITATIVE_SOURCE_URL;
use crmi_domain::{
    selection, Artifact, Compose, ComposeKind, Endpoint, Expansion, ExpansionContains,
    ExpansionParameter, Extension, HasExtensions,
};
use crmi_terminology::TerminologyClient;
use serde_json::Value;

use crate::domain::resolver::BoxFuture;
use crate::domain::traversal::TraversalContext;
use crate::repository::RepositoryGateway;

pub use cache::ExpansionCache;

/// Name of the expansion parameter carrying a warning
pub const WARNING_PARAMETER: &str = "warning";

/// Parameters that identify the value set being expanded; never passed on to children
const IDENTITY_PARAMETERS: &[&str] = &["url", "valueSetVersion"];

/// Requested version pins and the expansion parameter a server reports them under
const VERSION_PINS: &[(&str, &str)] = &[
    ("system-version", "used-codesystem"),
    ("valueset-version", "used-valueset"),
];

/// Expanded value sets of one run, by url
type Expanded = HashMap<String, Artifact>;

#[derive(Clone)]
pub struct ExpansionEngine {
    repository: Arc<dyn RepositoryGateway>,
    terminology: Arc<dyn TerminologyClient>,
    cache: Option<Arc<ExpansionCache>>,
}

impl ExpansionEngine {
    pub fn new(
        repository: Arc<dyn RepositoryGateway>,
        terminology: Arc<dyn TerminologyClient>,
        cache: Option<Arc<ExpansionCache>>,
    ) -> Self {
        Self {
            repository,
            terminology,
            cache,
        }
    }

    /// Expand every value set that has no expansion yet.
    ///
    /// The value sets double as the first place child value sets of a grouping are
    /// looked up. Warnings end up in the traversal context.
    pub async fn expand_all(
        &self,
        value_sets: &mut [Artifact],
        parameters: Option<&Value>,
        endpoint: Option<&Endpoint>,
        ctx: &mut TraversalContext,
    ) -> Result<()> {
        let available: Vec<Artifact> = value_sets.to_vec();
        let mut expanded = Expanded::new();

        for value_set in value_sets.iter_mut() {
            let url = value_set.url().to_string();
            if value_set.expansion.is_some() {
                ctx.mark_expanded(&url);
                continue;
            }
            let key = value_set.canonical();
            if let Some(hit) = self.cached(&key, parameters)? {
                tracing::debug!(canonical = %key, "Expansion cache hit");
                value_set.expansion = Some(hit);
                ctx.mark_expanded(&url);
                continue;
            }
            if let Some(done) = expanded.get(&url) {
                *value_set = done.clone();
                continue;
            }

            let scoped = scoped_parameters(parameters);
            self.expand_one(
                value_set,
                scoped.as_ref(),
                endpoint,
                &available,
                &mut expanded,
                ctx,
            )
            .await?;
            self.remember(&key, value_set, parameters)?;
        }

        for value_set in value_sets.iter() {
            for warning in warnings(value_set) {
                ctx.warn(warning);
            }
        }
        Ok(())
    }

    /// Expand a single value set
    pub async fn expand(
        &self,
        value_set: &mut Artifact,
        parameters: Option<&Value>,
        endpoint: Option<&Endpoint>,
        ctx: &mut TraversalContext,
    ) -> Result<()> {
        self.expand_all(std::slice::from_mut(value_set), parameters, endpoint, ctx)
            .await
    }

    fn cached(&self, key: &Canonical, parameters: Option<&Value>) -> Result<Option<Expansion>> {
        match &self.cache {
            Some(cache) => cache.get(key, parameters),
            None => Ok(None),
        }
    }

    /// Cache under the canonical the value set had before it was expanded
    fn remember(&self, key: &Canonical, value_set: &Artifact, parameters: Option<&Value>) -> Result<()> {
        if let (Some(cache), Some(expansion)) = (&self.cache, &value_set.expansion) {
            cache.insert_if_absent(key, parameters, expansion.clone())?;
        }
        Ok(())
    }

    fn expand_one<'a>(
        &'a self,
        value_set: &'a mut Artifact,
        parameters: Option<&'a Value>,
        endpoint: Option<&'a Endpoint>,
        available: &'a [Artifact],
        expanded: &'a mut Expanded,
        ctx: &'a mut TraversalContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = value_set.url().to_string();
            ctx.mark_expanded(&url);

            if let Some(endpoint) = endpoint.filter(|e| delegates_to(value_set, e)) {
                match self.terminology.expand(value_set, endpoint, parameters).await {
                    Ok(result) => {
                        value_set.expansion = result.expansion;
                        if !value_set.has_version() {
                            value_set.version = result.version;
                        }
                        check_version_pins(value_set, parameters);
                        tracing::debug!(canonical = %value_set.canonical(), "Expanded by terminology server");
                        expanded.insert(url, value_set.clone());
                        return Ok(());
                    }
                    Err(e) => ctx.warn(format!(
                        "Failed to expand value set {}. Reason: {}. Will attempt to expand locally.",
                        value_set.canonical(),
                        e
                    )),
                }
            }

            let compose = value_set.compose.clone().unwrap_or_default();
            match compose.kind() {
                ComposeKind::Simple => {
                    value_set.expansion = Some(list_concepts(&compose));
                }
                ComposeKind::Grouping => {
                    let expansion = self
                        .union_of_children(&url, &compose, parameters, endpoint, available, expanded, ctx)
                        .await?;
                    value_set.expansion = Some(expansion);
                }
                ComposeKind::Complex => {
                    return Err(Error::UnresolvableExpansion(format!(
                        "Cannot expand ValueSet without a terminology server: {}",
                        url
                    )));
                }
            }
            tracing::debug!(canonical = %value_set.canonical(), "Expanded locally");
            expanded.insert(url, value_set.clone());
            Ok(())
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn union_of_children(
        &self,
        url: &str,
        compose: &Compose,
        parameters: Option<&Value>,
        endpoint: Option<&Endpoint>,
        available: &[Artifact],
        expanded: &mut Expanded,
        ctx: &mut TraversalContext,
    ) -> Result<Expansion> {
        let mut expansion = Expansion::at(Utc::now());
        let mut naive = false;

        for reference in compose.included_value_sets() {
            let child_url = canonical::url_part(reference);
            let child = match expanded.get(child_url).cloned() {
                Some(done) => done,
                None if ctx.is_expanded(child_url) => {
                    tracing::warn!(value_set = %url, child = %reference, "Cyclic value set include skipped");
                    continue;
                }
                None => {
                    let mut child = self
                        .find_child(reference, endpoint, available, ctx)
                        .await?
                        .ok_or_else(|| {
                            Error::UnresolvableExpansion(format!(
                                "Terminology Server expansion failed for ValueSet '{}' because Child ValueSet '{}' could not be found.",
                                url, reference
                            ))
                        })?;
                    if child.expansion.is_some() {
                        ctx.mark_expanded(child_url);
                        expanded.insert(child_url.to_string(), child.clone());
                    } else {
                        let scoped = scoped_parameters(parameters);
                        self.expand_one(&mut child, scoped.as_ref(), endpoint, available, expanded, ctx)
                            .await?;
                    }
                    child
                }
            };

            if let Some(child_expansion) = &child.expansion {
                naive |= child_expansion.is_naive();
                for code in &child_expansion.contains {
                    if !expansion.contains.iter().any(|existing| same_code(existing, code)) {
                        expansion.contains.push(code.clone());
                    }
                }
            }
        }

        if naive {
            expansion.mark_naive();
        }
        expansion.total = Some(expansion.contains.len());
        Ok(expansion)
    }

    /// Child value set of a grouping: from the package, the terminology server, or the repository
    async fn find_child(
        &self,
        reference: &str,
        endpoint: Option<&Endpoint>,
        available: &[Artifact],
        ctx: &mut TraversalContext,
    ) -> Result<Option<Artifact>> {
        let url = canonical::url_part(reference);
        let version = canonical::version_part(reference);
        if let Some(found) = available
            .iter()
            .find(|vs| vs.url() == url && version.is_none_or(|v| vs.version() == Some(v)))
        {
            return Ok(Some(found.clone()));
        }

        if let Some(endpoint) = endpoint {
            match self.terminology.get_resource(endpoint, reference, None).await {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => {}
                Err(e) => ctx.warn(format!(
                    "Failed to retrieve child value set '{}' from the terminology server: {}",
                    reference, e
                )),
            }
        }

        let found = self.repository.search(reference, None).await?;
        Ok(selection::latest(&found).cloned())
    }
}

fn address_base(url: &str) -> &str {
    url.split_once("/ValueSet")
        .map_or(url, |(base, _)| base)
        .trim_end_matches('/')
}

/// Whether expansion of the value set belongs to this endpoint
fn delegates_to(value_set: &Artifact, endpoint: &Endpoint) -> bool {
    match value_set
        .extension(AUTHORITATIVE_SOURCE_URL)
        .and_then(Extension::text_value)
    {
        None => true,
        Some(source) => address_base(source) == endpoint.address.trim_end_matches('/'),
    }
}

/// Caller parameters without the ones naming a specific value set
fn scoped_parameters(parameters: Option<&Value>) -> Option<Value> {
    let mut scoped = parameters?.clone();
    if let Some(entries) = scoped.get_mut("parameter").and_then(Value::as_array_mut) {
        entries.retain(|p| {
            p.get("name")
                .and_then(Value::as_str)
                .is_none_or(|name| !IDENTITY_PARAMETERS.contains(&name))
        });
    }
    Some(scoped)
}

fn list_concepts(compose: &Compose) -> Expansion {
    let mut expansion = Expansion::at(Utc::now());
    for include in &compose.include {
        for concept in &include.concept {
            expansion.contains.push(ExpansionContains {
                system: include.system.clone(),
                version: include.version.clone(),
                code: Some(concept.code.clone()),
                display: concept.display.clone(),
            });
        }
    }
    expansion.total = Some(expansion.contains.len());
    expansion.mark_naive();
    expansion
}

/// Same code when system and code match and the candidate's version is absent or equal
fn same_code(existing: &ExpansionContains, candidate: &ExpansionContains) -> bool {
    existing.system == candidate.system
        && existing.code == candidate.code
        && (candidate.version.is_none() || existing.version == candidate.version)
}

/// Warn in the expansion when a requested version pin was not used by the server
fn check_version_pins(value_set: &mut Artifact, parameters: Option<&Value>) {
    let Some(entries) = parameters
        .and_then(|p| p.get("parameter"))
        .and_then(Value::as_array)
    else {
        return;
    };
    let canonical = value_set.canonical();
    let Some(expansion) = value_set.expansion.as_mut() else {
        return;
    };

    for (requested, used) in VERSION_PINS {
        for entry in entries
            .iter()
            .filter(|p| p.get("name").and_then(Value::as_str) == Some(*requested))
        {
            let Some(pin) = ["valueUri", "valueCanonical", "valueString"]
                .iter()
                .find_map(|key| entry.get(*key).and_then(Value::as_str))
            else {
                continue;
            };
            let honoured = expansion.parameter.iter().any(|p| {
                p.name == *used
                    && (p.value_uri.as_deref() == Some(pin) || p.value_string.as_deref() == Some(pin))
            });
            if !honoured {
                expansion.parameter.push(ExpansionParameter {
                    name: WARNING_PARAMETER.to_string(),
                    value_string: Some(format!(
                        "Expansion of {} did not report the requested {} '{}'",
                        canonical, requested, pin
                    )),
                    ..Default::default()
                });
            }
        }
    }
}

fn warnings(value_set: &Artifact) -> Vec<String> {
    value_set
        .expansion
        .iter()
        .flat_map(|e| e.parameter.iter())
        .filter(|p| p.name == WARNING_PARAMETER)
        .filter_map(|p| p.value_string.clone())
        .collect()
}
