//! `$withdraw`: discard a draft with its owned components and the assessments recorded against it

use crmi_common::Result;
use crmi_domain::{Artifact, Bundle, BundleEntry, LifecycleEvent};

use super::{require_transition, storage_reference, ArtifactServices, Operation, Visitor};
use crate::domain::parameters::OperationParameters;
use crate::domain::traversal::TraversalContext;

pub struct WithdrawVisitor {
    services: ArtifactServices,
}

impl WithdrawVisitor {
    pub fn new(services: ArtifactServices) -> Self {
        Self { services }
    }
}

#[async_trait::async_trait]
impl Visitor for WithdrawVisitor {
    fn operation(&self) -> Operation {
        Operation::Withdraw
    }

    async fn visit(&self, artifact: Artifact, _parameters: &OperationParameters) -> Result<Bundle> {
        require_transition(&artifact, LifecycleEvent::Withdraw)?;
        let url = artifact.url().to_string();
        let subject = artifact.canonical().to_string();

        let mut ctx = TraversalContext::new();
        let closure = self
            .services
            .resolver()
            .owned_closure(artifact, &mut ctx)
            .await?;
        let assessments = self.services.repository.search_assessments(&subject).await?;

        let mut bundle = Bundle::transaction();
        for resource in closure.iter().chain(assessments.iter()) {
            bundle.push(BundleEntry::delete(storage_reference(resource)?));
        }
        tracing::info!(url = %url, deletes = bundle.len(), "Withdrawing draft");
        Ok(self.services.repository.transaction(bundle).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crate::visitors::testing::{library, services};
    use chrono::Utc;
    use crmi_common::Error;
    use crmi_domain::{ArtifactAssessment, ArtifactStatus, HttpVerb, RelatedArtifact};
    use crmi_terminology::mock::MockTerminologyClient;

    // WDR-U01: root, owned components, and assessments are deleted
    #[tokio::test]
    async fn test_withdraw_deletes_closure_and_assessments() {
        let root = library("root", "1.0.0-draft", ArtifactStatus::Draft)
            .with_related_artifact(RelatedArtifact::component("http://x.org/Library/owned", true));
        let mut comment = ArtifactAssessment::new("http://x.org/Library/root|1.0.0-draft", Utc::now())
            .into_artifact()
            .unwrap();
        comment.id = Some("comment".to_string());
        let repo = InMemoryRepository::with_resources([
            root.clone(),
            library("owned", "1.0.0-draft", ArtifactStatus::Draft),
            comment,
        ]);

        WithdrawVisitor::new(services(&repo, &MockTerminologyClient::new()))
            .visit(root, &OperationParameters::new())
            .await
            .unwrap();

        let submitted = &repo.recorded_transactions()[0];
        assert_eq!(submitted.entries_with(HttpVerb::Delete).count(), 3);
        assert_eq!(repo.count(), 0);
    }

    // WDR-U03: assessments recorded against another version survive
    #[tokio::test]
    async fn test_withdraw_keeps_released_version_assessments() {
        let released = Artifact::new("Library", "root-released", "http://x.org/Library/root")
            .with_version("1.0.0")
            .with_status(ArtifactStatus::Active);
        let draft = library("root", "1.1.0-draft", ArtifactStatus::Draft);
        let mut approval = ArtifactAssessment::new("http://x.org/Library/root|1.0.0", Utc::now())
            .into_artifact()
            .unwrap();
        approval.id = Some("approval-of-1.0.0".to_string());
        let mut comment = ArtifactAssessment::new("http://x.org/Library/root|1.1.0-draft", Utc::now())
            .into_artifact()
            .unwrap();
        comment.id = Some("draft-comment".to_string());
        let repo = InMemoryRepository::with_resources([released, draft.clone(), approval, comment]);

        WithdrawVisitor::new(services(&repo, &MockTerminologyClient::new()))
            .visit(draft, &OperationParameters::new())
            .await
            .unwrap();

        let submitted = &repo.recorded_transactions()[0];
        let deleted: Vec<&str> = submitted
            .entries_with(HttpVerb::Delete)
            .filter_map(|e| e.request.as_ref())
            .map(|r| r.url.as_str())
            .collect();
        assert_eq!(deleted, vec!["Library/root", "ArtifactAssessment/draft-comment"]);
        assert!(repo.get("ArtifactAssessment", "approval-of-1.0.0").is_some());
        assert!(repo.get("Library", "root-released").is_some());
    }

    // WDR-U02: withdrawing an active artifact fails with no side effects
    #[tokio::test]
    async fn test_withdraw_active_fails() {
        let root = library("root", "1.0.0", ArtifactStatus::Active);
        let repo = InMemoryRepository::with_resources([root.clone()]);
        let result = WithdrawVisitor::new(services(&repo, &MockTerminologyClient::new()))
            .visit(root, &OperationParameters::new())
            .await;

        assert!(matches!(result, Err(Error::PreconditionFailed(_))));
        assert!(repo.recorded_transactions().is_empty());
        assert_eq!(repo.count(), 1);
    }
}
