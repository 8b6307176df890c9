//! Lifecycle operation integration tests (LC-I01 through LC-I06)

use axum::http::StatusCode;
use crmi_domain::{ArtifactStatus, HttpVerb, RelatedArtifact};
use serde_json::json;
use std::collections::HashSet;

use crate::common::{library, no_parameters, parameters, releasable, TestApp};

fn release_parameters(version: &str, behavior: &str) -> serde_json::Value {
    parameters(&[
        ("version", "valueString", json!(version)),
        ("versionBehavior", "valueCode", json!(behavior)),
    ])
}

mod test_release {
    use super::*;

    // LC-I01: releasing a draft activates its owned component in one transaction
    #[tokio::test]
    async fn test_release_activates_owned_component() {
        let (root, component) = releasable();
        let app = TestApp::new([root, component]);

        let (status, body) = app
            .operation("/Library/root/$release", release_parameters("1.2.0", "default"))
            .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        let submitted = app.repo.recorded_transactions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].entries_with(HttpVerb::Put).count(), 2);
        assert_eq!(submitted[0].entries_with(HttpVerb::Delete).count(), 0);

        let component = app.stored("component");
        assert_eq!(component.status(), ArtifactStatus::Active);
        assert_eq!(component.version(), Some("1.2.0"));
        let root = app.stored("root");
        assert_eq!(root.status(), ArtifactStatus::Active);
        assert_eq!(root.version(), Some("1.2.0"));
    }

    // LC-I02: dependencies already at their target versions are listed once
    #[tokio::test]
    async fn test_re_release_has_no_duplicate_dependencies() {
        let (root, component) = releasable();
        let root = root.with_related_artifact(RelatedArtifact::depends_on(
            "http://x.org/Library/shared|1.0.0",
        ));
        let component = component.with_related_artifact(RelatedArtifact::depends_on(
            "http://x.org/Library/shared|1.0.0",
        ));
        let app = TestApp::new([
            root,
            component,
            library("shared", "1.0.0", ArtifactStatus::Active),
        ]);

        let (status, _) = app
            .operation("/Library/root/$release", release_parameters("1.2.0", "default"))
            .await;
        assert_eq!(status, StatusCode::OK);

        let released = app.stored("root");
        let mut seen = HashSet::new();
        for related in &released.related_artifact {
            let key = (related.resource.clone(), related.kind.to_string());
            assert!(seen.insert(key), "duplicate related artifact {:?}", related);
        }
        let shared = released
            .related_artifact
            .iter()
            .filter(|ra| ra.reference() == Some("http://x.org/Library/shared|1.0.0"))
            .count();
        assert_eq!(shared, 1);
    }

    // LC-I03: versionBehavior=check refuses a differing version without writing
    #[tokio::test]
    async fn test_release_check_mismatch() {
        let (root, component) = releasable();
        let app = TestApp::new([root, component]);

        let (status, body) = app
            .operation("/Library/root/$release", release_parameters("2.0.0", "check"))
            .await;

        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["error"]["code"], "PRECONDITION_FAILED");
        assert!(app.repo.recorded_transactions().is_empty());
        assert_eq!(app.stored("root").status(), ArtifactStatus::Draft);
    }
}

mod test_draft {
    use super::*;

    // LC-I04: a second draft of the same version is refused, nothing is duplicated
    #[tokio::test]
    async fn test_draft_is_unique() {
        let root = library("root", "1.0.0", ArtifactStatus::Active).with_related_artifact(
            RelatedArtifact::component("http://x.org/Library/owned|1.0.0", true),
        );
        let app = TestApp::new([root, library("owned", "1.0.0", ArtifactStatus::Active)]);
        let draft = parameters(&[("version", "valueString", json!("1.1.0"))]);

        let (status, _) = app.operation("/Library/root/$draft", draft.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.repo.count(), 4);

        let (status, body) = app.operation("/Library/root/$draft", draft).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("1.1.0-draft"));
        assert_eq!(app.repo.count(), 4);

        let drafts = app
            .repo
            .all()
            .into_iter()
            .filter(|a| a.version() == Some("1.1.0-draft"))
            .count();
        assert_eq!(drafts, 2);
    }
}

mod test_withdraw {
    use super::*;

    // LC-I05: withdrawing an active artifact fails without side effects
    #[tokio::test]
    async fn test_withdraw_active_is_refused() {
        let app = TestApp::new([library("root", "1.0.0", ArtifactStatus::Active)]);

        let (status, body) = app
            .operation("/Library/root/$withdraw", no_parameters())
            .await;

        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["error"]["code"], "PRECONDITION_FAILED");
        assert!(app.repo.recorded_transactions().is_empty());
        assert_eq!(app.repo.count(), 1);
        assert_eq!(app.stored("root").status(), ArtifactStatus::Active);
    }
}

mod test_full_cycle {
    use super::*;

    // LC-I06: approve, release, retire, then delete a root and its owned component
    #[test_log::test(tokio::test)]
    async fn test_approve_release_retire_delete() {
        let root = library("root", "1.0.0-draft", ArtifactStatus::Draft).with_related_artifact(
            RelatedArtifact::component("http://x.org/Library/child|1.0.0-draft", true),
        );
        let app = TestApp::new([root, library("child", "1.0.0-draft", ArtifactStatus::Draft)]);

        let (status, body) = app
            .operation("/Library/root/$approve", no_parameters())
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(app.stored("root").approval_date.is_some());

        let (status, body) = app
            .operation("/Library/root/$release", release_parameters("1.0.0", "default"))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(app.stored("child").status(), ArtifactStatus::Active);

        let (status, _) = app.operation("/Library/root/$retire", no_parameters()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.stored("root").status(), ArtifactStatus::Retired);
        assert_eq!(app.stored("child").status(), ArtifactStatus::Retired);

        let (status, _) = app.operation("/Library/root/$delete", no_parameters()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.repo.get("Library", "root").is_none());
        assert!(app.repo.get("Library", "child").is_none());
    }
}
