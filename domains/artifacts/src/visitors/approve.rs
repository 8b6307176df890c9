//! `$approve`: record approval metadata and an assessment; status is unchanged

use chrono::Utc;
use crmi_common::canonical;
use crmi_common::{Error, Result};
use crmi_domain::extensions::DEFAULT_ASSESSMENT_TYPE;
use crmi_domain::{
    Artifact, ArtifactAssessment, AssessmentContent, Bundle, BundleEntry, LifecycleEvent,
    Reference, RelatedArtifact, RelatedArtifactType,
};

use super::{require_transition, ArtifactServices, Operation, Visitor};
use crate::domain::parameters::OperationParameters;

pub struct ApproveVisitor {
    services: ArtifactServices,
}

impl ApproveVisitor {
    pub fn new(services: ArtifactServices) -> Self {
        Self { services }
    }
}

/// The target, when given, must name the artifact being approved
fn check_target(artifact: &Artifact, target: &str) -> Result<()> {
    if canonical::url_part(target) != artifact.url() {
        return Err(Error::Unprocessable(
            "ArtifactAssessment target URL does not match URL of resource being approved."
                .to_string(),
        ));
    }
    if let (Some(version), Some(target_version)) = (artifact.version(), canonical::version_part(target)) {
        if version != target_version {
            return Err(Error::Unprocessable(
                "ArtifactAssessment target version does not match version of resource being approved."
                    .to_string(),
            ));
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl Visitor for ApproveVisitor {
    fn operation(&self) -> Operation {
        Operation::Approve
    }

    async fn visit(&self, mut artifact: Artifact, parameters: &OperationParameters) -> Result<Bundle> {
        require_transition(&artifact, LifecycleEvent::Approve)?;
        let now = Utc::now();
        let approval_date = parameters.date("approvalDate")?.unwrap_or_else(|| now.date_naive());
        let target = parameters.string("artifactAssessmentTarget");
        if let Some(target) = target {
            check_target(&artifact, target)?;
        }

        let mut content = AssessmentContent {
            information_type: Some(
                parameters
                    .string("artifactAssessmentType")
                    .unwrap_or(DEFAULT_ASSESSMENT_TYPE)
                    .to_string(),
            ),
            summary: parameters.string("artifactAssessmentSummary").map(str::to_string),
            author: parameters.reference("artifactAssessmentAuthor").map(Reference::to),
            related_artifact: Vec::new(),
        };
        if let Some(target) = target {
            content
                .related_artifact
                .push(RelatedArtifact::new(RelatedArtifactType::DerivedFrom, target));
        }
        if let Some(related) = parameters.string("artifactAssessmentRelatedArtifact") {
            content.related_artifact.push(RelatedArtifact::new(
                RelatedArtifactType::Other("citation".to_string()),
                related,
            ));
        }

        let assessment = ArtifactAssessment::new(artifact.canonical().to_string(), now)
            .with_content(content)
            .into_artifact()?;

        artifact.approval_date = Some(approval_date);
        artifact.date = Some(now);
        tracing::info!(
            canonical = %artifact.canonical(),
            approval_date = %approval_date,
            "Approving artifact"
        );

        let mut bundle = Bundle::transaction();
        bundle.push(BundleEntry::create(assessment));
        bundle.push(BundleEntry::update(artifact));
        Ok(self.services.repository.transaction(bundle).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crate::visitors::testing::{assessments, library, services};
    use chrono::NaiveDate;
    use crmi_domain::{ArtifactStatus, HttpVerb, ASSESSMENT_RESOURCE_TYPE};
    use crmi_terminology::mock::MockTerminologyClient;

    fn visitor(repo: &InMemoryRepository) -> ApproveVisitor {
        ApproveVisitor::new(services(repo, &MockTerminologyClient::new()))
    }

    // APP-U01: approval date and assessment are recorded, status unchanged
    #[tokio::test]
    async fn test_approve_records_assessment() {
        let root = library("root", "1.0.0-draft", ArtifactStatus::Draft);
        let repo = InMemoryRepository::with_resources([root.clone()]);
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let parameters = OperationParameters::new()
            .with_date("approvalDate", date)
            .with_string("artifactAssessmentSummary", "Looks good")
            .with_string("artifactAssessmentTarget", "http://x.org/Library/root|1.0.0-draft")
            .with_reference("artifactAssessmentAuthor", "Practitioner/reviewer");

        visitor(&repo).visit(root, &parameters).await.unwrap();

        let submitted = &repo.recorded_transactions()[0];
        assert_eq!(submitted.entry[0].method(), Some(HttpVerb::Post));
        assert_eq!(submitted.entry[1].method(), Some(HttpVerb::Put));

        let stored = repo.get("Library", "root").unwrap();
        assert_eq!(stored.approval_date, Some(date));
        assert_eq!(stored.status(), ArtifactStatus::Draft);
        assert!(stored.date.is_some());

        let assessments = assessments(&repo, "http://x.org/Library/root|1.0.0-draft").await;
        assert_eq!(assessments.len(), 1);
        let assessment = &assessments[0];
        assert_eq!(assessment.resource_type, ASSESSMENT_RESOURCE_TYPE);
        assert_eq!(
            assessment.artifact_canonical.as_deref(),
            Some("http://x.org/Library/root|1.0.0-draft")
        );
        let content = &assessment.content[0];
        assert_eq!(content.information_type.as_deref(), Some("comment"));
        assert_eq!(content.summary.as_deref(), Some("Looks good"));
        assert_eq!(
            assessment.derived_from(),
            Some("http://x.org/Library/root|1.0.0-draft")
        );
    }

    // APP-U02: a target naming another artifact is rejected before anything is written
    #[tokio::test]
    async fn test_target_mismatch() {
        let root = library("root", "1.0.0", ArtifactStatus::Active);
        let repo = InMemoryRepository::with_resources([root.clone()]);

        let other_url = OperationParameters::new()
            .with_string("artifactAssessmentTarget", "http://x.org/Library/other|1.0.0");
        assert!(matches!(
            visitor(&repo).visit(root.clone(), &other_url).await,
            Err(Error::Unprocessable(_))
        ));

        let other_version = OperationParameters::new()
            .with_string("artifactAssessmentTarget", "http://x.org/Library/root|2.0.0");
        assert!(matches!(
            visitor(&repo).visit(root, &other_version).await,
            Err(Error::Unprocessable(_))
        ));
        assert!(repo.recorded_transactions().is_empty());
    }

    // APP-U03: defaults are today and type comment
    #[tokio::test]
    async fn test_defaults() {
        let root = library("root", "1.0.0", ArtifactStatus::Active);
        let repo = InMemoryRepository::with_resources([root.clone()]);
        visitor(&repo)
            .visit(root, &OperationParameters::new())
            .await
            .unwrap();

        let stored = repo.get("Library", "root").unwrap();
        assert_eq!(stored.approval_date, Some(Utc::now().date_naive()));
        let assessment = &assessments(&repo, "http://x.org/Library/root|1.0.0").await[0];
        assert_eq!(
            assessment.content[0].information_type.as_deref(),
            Some(DEFAULT_ASSESSMENT_TYPE)
        );
    }
}
