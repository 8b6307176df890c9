//! `$package`: gather an artifact with everything it needs into one bundle
//!
//! The root comes first, followed by every reachable artifact that passes the
//! capability and `include` filters, each `url|version` once. Value sets are expanded
//! on the way. Implementation guides the repository does not hold are fetched from the
//! package registry, when one is configured, and their resources appended as published.
//! Nothing is written; the bundle is the result.

use crmi_common::canonical;
use crmi_common::{Error, Result};
use crmi_domain::extensions::{EXPANSION_PARAMETERS_URL, MESSAGES_URL};
use crmi_domain::{Artifact, Bundle, BundleEntry, BundleType, Extension, HasExtensions};
use serde_json::Value;

use super::{ArtifactServices, Operation, Visitor};
use crate::domain::parameters::OperationParameters;
use crate::domain::resolver::WalkOptions;
use crate::domain::traversal::TraversalContext;
use crate::domain::version_policy::VersionPolicy;

const UNSUPPORTED_CONTENT: &str =
    "This repository is not implementing custom Content and endpoints at this time";

fn reject_unimplemented(parameters: &OperationParameters) -> Result<()> {
    let custom_content = parameters.string("artifactRoute").is_some()
        || parameters.string("endpointUri").is_some()
        || parameters.has("endpoint");
    if custom_content {
        return Err(Error::NotImplemented(UNSUPPORTED_CONTENT.to_string()));
    }
    if parameters.flag("packageOnly")? {
        return Err(Error::NotImplemented(
            "packageOnly is not supported by this repository".to_string(),
        ));
    }
    Ok(())
}

fn non_negative(parameters: &OperationParameters, name: &str) -> Result<Option<usize>> {
    match parameters.integer(name)? {
        Some(value) if value < 0 => Err(Error::InvalidRequest(format!(
            "'{}' must be non-negative",
            name
        ))),
        Some(value) => Ok(Some(value as usize)),
        None => Ok(None),
    }
}

/// Requested shape of the result bundle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Paging {
    count: Option<usize>,
    offset: Option<usize>,
    collection: bool,
}

impl Paging {
    fn from_parameters(parameters: &OperationParameters) -> Result<Self> {
        let count = non_negative(parameters, "count")?;
        let offset = non_negative(parameters, "offset")?;
        let requested = parameters.string("bundleType");
        if let Some(kind) = requested.filter(|t| matches!(*t, "transaction" | "collection")) {
            if count.is_some() || offset.is_some() {
                return Err(Error::InvalidRequest(format!(
                    "It is invalid to use paging when requesting a bundle of type '{}'",
                    kind
                )));
            }
        }
        Ok(Self {
            count,
            offset,
            collection: requested == Some("collection"),
        })
    }

    /// Set the bundle type and cut the requested page
    fn apply(&self, bundle: &mut Bundle) {
        let total = bundle.len();
        if self.count == Some(0) {
            bundle.kind = BundleType::Searchset;
            bundle.total = Some(total);
            return;
        }

        let offset = self.offset.unwrap_or(0);
        let partial = offset > 0 || self.count.is_some_and(|count| count < total);
        if partial || self.collection {
            bundle.kind = BundleType::Collection;
            bundle.strip_requests();
        }
        if partial {
            let count = self.count.unwrap_or(total);
            bundle.entry = std::mem::take(&mut bundle.entry)
                .into_iter()
                .skip(offset)
                .take(count)
                .collect();
        }
    }
}

/// `include` categories; empty or `all` keeps everything, `artifact` keeps only the root
fn keeps(
    services: &ArtifactServices,
    include: &[String],
    artifact: &Artifact,
) -> bool {
    if include.is_empty() || include.iter().any(|c| c == "all") {
        return true;
    }
    include
        .iter()
        .filter(|c| c.as_str() != "artifact")
        .any(|category| services.model.in_category(artifact, category))
}

/// Contained `Parameters` resource named by the root's expansion-parameters extension
fn expansion_parameters(root: &Artifact) -> Option<Value> {
    let reference = root.extension(EXPANSION_PARAMETERS_URL)?.text_value()?;
    let id = reference.trim_start_matches('#');
    root.other
        .get("contained")?
        .as_array()?
        .iter()
        .find(|resource| resource.get("id").and_then(Value::as_str) == Some(id))
        .cloned()
}

/// `cqf-messages` extension with one nested string per message
fn messages_extension(messages: &[String]) -> Extension {
    let mut extension = Extension::new(MESSAGES_URL);
    extension.extension = messages
        .iter()
        .map(|message| Extension::with_string(MESSAGES_URL, message.as_str()))
        .collect();
    extension
}

pub struct PackageVisitor {
    services: ArtifactServices,
}

impl PackageVisitor {
    pub fn new(services: ArtifactServices) -> Self {
        Self { services }
    }

    /// Resources of the unresolved implementation guide dependencies, from the registry
    async fn registry_resources(&self, include: &[String], ctx: &mut TraversalContext) -> Vec<Artifact> {
        let Some(registry) = &self.services.packages else {
            return Vec::new();
        };
        let guides: Vec<String> = ctx
            .unresolved()
            .iter()
            .filter(|r| canonical::resource_type_of(r) == Some("ImplementationGuide"))
            .cloned()
            .collect();
        let mut fetched = Vec::new();
        for reference in guides {
            match registry.fetch_resources(&reference).await {
                Ok(resources) => fetched.extend(
                    resources
                        .into_iter()
                        .filter(|r| keeps(&self.services, include, r)),
                ),
                Err(e) => ctx.warn(format!("Failed to fetch package '{}': {}", reference, e)),
            }
        }
        fetched
    }
}

#[async_trait::async_trait]
impl Visitor for PackageVisitor {
    fn operation(&self) -> Operation {
        Operation::Package
    }

    async fn visit(&self, artifact: Artifact, parameters: &OperationParameters) -> Result<Bundle> {
        reject_unimplemented(parameters)?;
        let paging = Paging::from_parameters(parameters)?;
        let include = parameters.strings("include");
        let is_put = parameters.flag("isPut")?;
        let endpoint = parameters
            .endpoint("terminologyEndpoint")
            .or_else(|| self.services.default_endpoint.clone());
        let root_canonical = artifact.canonical();

        let options = WalkOptions {
            capabilities: parameters.strings("capability"),
            policy: VersionPolicy::from_parameters(parameters),
            terminology_endpoint: endpoint.clone(),
            ..WalkOptions::default()
        };
        let mut ctx = TraversalContext::new();
        let nodes = self
            .services
            .resolver()
            .walk(artifact, &options, &mut ctx)
            .await?;
        if nodes.first().is_none_or(|n| !n.is_root()) {
            return Err(Error::Unprocessable(format!(
                "{} does not support the requested capabilities",
                root_canonical
            )));
        }

        let mut resources: Vec<Artifact> = Vec::new();
        for node in nodes {
            let keep = node.is_root() || keeps(&self.services, &include, &node.artifact);
            let duplicate = resources
                .iter()
                .any(|r| r.url() == node.artifact.url() && r.version() == node.artifact.version());
            if keep && !duplicate {
                resources.push(node.artifact);
            }
        }

        let positions: Vec<usize> = resources
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_value_set())
            .map(|(i, _)| i)
            .collect();
        if !positions.is_empty() {
            let expansion_parameters = expansion_parameters(&resources[0]);
            let mut value_sets: Vec<Artifact> =
                positions.iter().map(|&i| resources[i].clone()).collect();
            self.services
                .expansion()
                .expand_all(
                    &mut value_sets,
                    expansion_parameters.as_ref(),
                    endpoint.as_ref(),
                    &mut ctx,
                )
                .await?;
            for (position, value_set) in positions.into_iter().zip(value_sets) {
                resources[position] = value_set;
            }
        }

        for resource in self.registry_resources(&include, &mut ctx).await {
            let duplicate = resources
                .iter()
                .any(|r| r.url() == resource.url() && r.version() == resource.version());
            if !duplicate {
                resources.push(resource);
            }
        }

        if !ctx.messages().is_empty() {
            tracing::warn!(
                canonical = %root_canonical,
                messages = ctx.messages().len(),
                "Package built with warnings"
            );
            resources[0].set_extension(messages_extension(ctx.messages()));
        }

        let mut bundle = Bundle::transaction();
        for resource in resources {
            bundle.push(if is_put {
                BundleEntry::update(resource)
            } else {
                BundleEntry::create(resource)
            });
        }
        tracing::info!(canonical = %root_canonical, entries = bundle.len(), "Packaged artifact");
        paging.apply(&mut bundle);
        Ok(bundle)
    }
}
