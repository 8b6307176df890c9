//! `$retire`: take an active artifact and its owned components out of use

use chrono::Utc;
use crmi_common::Result;
use crmi_domain::{Artifact, ArtifactStatus, Bundle, BundleEntry, LifecycleEvent};

use super::{require_transition, ArtifactServices, Operation, Visitor};
use crate::domain::parameters::OperationParameters;
use crate::domain::traversal::TraversalContext;

pub struct RetireVisitor {
    services: ArtifactServices,
}

impl RetireVisitor {
    pub fn new(services: ArtifactServices) -> Self {
        Self { services }
    }
}

#[async_trait::async_trait]
impl Visitor for RetireVisitor {
    fn operation(&self) -> Operation {
        Operation::Retire
    }

    async fn visit(&self, artifact: Artifact, _parameters: &OperationParameters) -> Result<Bundle> {
        require_transition(&artifact, LifecycleEvent::Retire)?;

        let mut ctx = TraversalContext::new();
        let closure = self
            .services
            .resolver()
            .owned_closure(artifact, &mut ctx)
            .await?;

        let now = Utc::now();
        let mut bundle = Bundle::transaction();
        for mut resource in closure {
            resource.status = Some(ArtifactStatus::Retired);
            resource.date = Some(now);
            bundle.push(BundleEntry::update(resource));
        }
        tracing::info!(resources = bundle.len(), "Retiring artifact");
        Ok(self.services.repository.transaction(bundle).await?)
    }
}
