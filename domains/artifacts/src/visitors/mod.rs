//! Lifecycle operations over knowledge artifacts
//!
//! Each operation is a [`Visitor`]: it checks the root artifact's preconditions,
//! builds a bundle describing every change, and submits it. Nothing is written
//! before the whole bundle has been built.

pub mod approve;
pub mod delete;
pub mod draft;
pub mod package;
pub mod release;
pub mod retire;
pub mod withdraw;

use std::str::FromStr;
use std::sync::Arc;

use crmi_common::{Error, Result};
use crmi_domain::model::ArtifactModel;
use crmi_domain::{Artifact, ArtifactStateMachine, Bundle, Endpoint, LifecycleEvent};
use crmi_terminology::{PackageRegistry, TerminologyClient};

use crate::domain::parameters::OperationParameters;
use crate::domain::resolver::DependencyResolver;
use crate::domain::traversal::TraversalContext;
use crate::expansion::{ExpansionCache, ExpansionEngine};
use crate::publish::{PublishConfig, PublishStrategy};
use crate::repository::RepositoryGateway;

pub use approve::ApproveVisitor;
pub use delete::DeleteVisitor;
pub use draft::DraftVisitor;
pub use package::PackageVisitor;
pub use release::ReleaseVisitor;
pub use retire::RetireVisitor;
pub use withdraw::WithdrawVisitor;

/// Collaborators shared by every operation
#[derive(Clone)]
pub struct ArtifactServices {
    pub repository: Arc<dyn RepositoryGateway>,
    pub terminology: Arc<dyn TerminologyClient>,
    pub model: Arc<dyn ArtifactModel>,
    pub expansion_cache: Option<Arc<ExpansionCache>>,
    /// Endpoint used when an operation does not name one
    pub default_endpoint: Option<Endpoint>,
    pub publish: PublishConfig,
    /// Source of implementation guide packages the repository does not hold
    pub packages: Option<Arc<PackageRegistry>>,
}

impl ArtifactServices {
    pub fn new(
        repository: Arc<dyn RepositoryGateway>,
        terminology: Arc<dyn TerminologyClient>,
        model: Arc<dyn ArtifactModel>,
    ) -> Self {
        Self {
            repository,
            terminology,
            model,
            expansion_cache: None,
            default_endpoint: None,
            publish: PublishConfig::default(),
            packages: None,
        }
    }

    pub fn with_expansion_cache(mut self, cache: Arc<ExpansionCache>) -> Self {
        self.expansion_cache = Some(cache);
        self
    }

    pub fn with_default_endpoint(mut self, endpoint: Option<Endpoint>) -> Self {
        self.default_endpoint = endpoint;
        self
    }

    pub fn with_publish_config(mut self, config: PublishConfig) -> Self {
        self.publish = config;
        self
    }

    pub fn with_package_registry(mut self, registry: Arc<PackageRegistry>) -> Self {
        self.packages = Some(registry);
        self
    }

    pub fn resolver(&self) -> DependencyResolver {
        DependencyResolver::new(Arc::clone(&self.repository), Arc::clone(&self.terminology))
    }

    pub fn expansion(&self) -> ExpansionEngine {
        ExpansionEngine::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.terminology),
            self.expansion_cache.clone(),
        )
    }

    pub fn publisher(&self) -> PublishStrategy {
        PublishStrategy::new(Arc::clone(&self.repository), self.publish.clone())
    }
}

/// Operations exposed as `$name` on an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Approve,
    Draft,
    Release,
    Retire,
    Withdraw,
    Delete,
    Package,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Self::Approve,
        Self::Draft,
        Self::Release,
        Self::Retire,
        Self::Withdraw,
        Self::Delete,
        Self::Package,
    ];

    /// State machine event behind the operation; packaging changes no state
    pub fn lifecycle_event(&self) -> Option<LifecycleEvent> {
        match self {
            Self::Approve => Some(LifecycleEvent::Approve),
            Self::Draft => Some(LifecycleEvent::Draft),
            Self::Release => Some(LifecycleEvent::Release),
            Self::Retire => Some(LifecycleEvent::Retire),
            Self::Withdraw => Some(LifecycleEvent::Withdraw),
            Self::Delete => Some(LifecycleEvent::Delete),
            Self::Package => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "$approve"),
            Self::Draft => write!(f, "$draft"),
            Self::Release => write!(f, "$release"),
            Self::Retire => write!(f, "$retire"),
            Self::Withdraw => write!(f, "$withdraw"),
            Self::Delete => write!(f, "$delete"),
            Self::Package => write!(f, "$package"),
        }
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.strip_prefix('$').unwrap_or(s) {
            "approve" => Ok(Self::Approve),
            "draft" => Ok(Self::Draft),
            "release" => Ok(Self::Release),
            "retire" => Ok(Self::Retire),
            "withdraw" => Ok(Self::Withdraw),
            "delete" => Ok(Self::Delete),
            "package" => Ok(Self::Package),
            other => Err(Error::NotFound(format!("Unknown operation: {}", other))),
        }
    }
}

/// One lifecycle operation applied to a root artifact
#[async_trait::async_trait]
pub trait Visitor: Send + Sync {
    fn operation(&self) -> Operation;

    async fn visit(&self, artifact: Artifact, parameters: &OperationParameters) -> Result<Bundle>;
}

/// Visitor implementing an operation
pub fn visitor_for(operation: Operation, services: ArtifactServices) -> Box<dyn Visitor> {
    match operation {
        Operation::Approve => Box::new(ApproveVisitor::new(services)),
        Operation::Draft => Box::new(DraftVisitor::new(services)),
        Operation::Release => Box::new(ReleaseVisitor::new(services)),
        Operation::Retire => Box::new(RetireVisitor::new(services)),
        Operation::Withdraw => Box::new(WithdrawVisitor::new(services)),
        Operation::Delete => Box::new(DeleteVisitor::new(services)),
        Operation::Package => Box::new(PackageVisitor::new(services)),
    }
}

/// Fail unless the root's status allows the event
pub(crate) fn require_transition(artifact: &Artifact, event: LifecycleEvent) -> Result<()> {
    ArtifactStateMachine::apply(artifact.status(), event)?;
    Ok(())
}

/// Warnings collected while walking the graph of `url`
#[mutants::skip] // Logging only
pub(crate) fn log_messages(url: &str, ctx: &TraversalContext) {
    for message in ctx.messages() {
        tracing::warn!(url = %url, "{}", message);
    }
}

/// `Type/id` of a stored artifact
pub(crate) fn storage_reference(artifact: &Artifact) -> Result<String> {
    artifact.reference().ok_or_else(|| {
        Error::Internal(format!(
            "Artifact {} has no id",
            artifact.canonical()
        ))
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        for operation in Operation::ALL {
            let parsed: Operation = operation.to_string().parse().unwrap();
            assert_eq!(parsed, operation);
        }
        assert_eq!("release".parse::<Operation>().unwrap(), Operation::Release);
        assert!(matches!(
            "$evaluate".parse::<Operation>(),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_lifecycle_events() {
        assert_eq!(Operation::Package.lifecycle_event(), None);
        assert_eq!(
            Operation::Withdraw.lifecycle_event(),
            Some(LifecycleEvent::Withdraw)
        );
    }
}
