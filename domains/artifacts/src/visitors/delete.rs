//! `$delete`: remove a retired artifact and its owned components

use crmi_common::Result;
use crmi_domain::{Artifact, Bundle, BundleEntry, LifecycleEvent};

use super::{require_transition, storage_reference, ArtifactServices, Operation, Visitor};
use crate::domain::parameters::OperationParameters;
use crate::domain::traversal::TraversalContext;

pub struct DeleteVisitor {
    services: ArtifactServices,
}

impl DeleteVisitor {
    pub fn new(services: ArtifactServices) -> Self {
        Self { services }
    }
}

#[async_trait::async_trait]
impl Visitor for DeleteVisitor {
    fn operation(&self) -> Operation {
        Operation::Delete
    }

    async fn visit(&self, artifact: Artifact, _parameters: &OperationParameters) -> Result<Bundle> {
        require_transition(&artifact, LifecycleEvent::Delete)?;

        let mut ctx = TraversalContext::new();
        let closure = self
            .services
            .resolver()
            .owned_closure(artifact, &mut ctx)
            .await?;

        let mut bundle = Bundle::transaction();
        for resource in &closure {
            bundle.push(BundleEntry::delete(storage_reference(resource)?));
        }
        tracing::info!(deletes = bundle.len(), "Deleting retired artifact");
        Ok(self.services.repository.transaction(bundle).await?)
    }
}
