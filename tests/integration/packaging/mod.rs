//! Package operation integration tests (PK-I01 through PK-I05)

use axum::http::StatusCode;
use crmi_domain::{Artifact, ArtifactStatus, RelatedArtifact};
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::common::{
    entry_resource, enumerated_value_set, grouping_value_set, library, no_parameters, parameters,
    TestApp,
};

/// Active root depending on `n` active libraries, all stored
fn closure(n: usize) -> Vec<Artifact> {
    let mut root = library("root", "1.0.0", ArtifactStatus::Active);
    let mut stored = Vec::new();
    for i in 0..n {
        let name = format!("dep{}", i);
        root = root.with_related_artifact(RelatedArtifact::depends_on(format!(
            "http://x.org/Library/{}",
            name
        )));
        stored.push(library(&name, "1.0.0", ArtifactStatus::Active));
    }
    stored.push(root);
    stored
}

fn entry_urls(bundle: &Value) -> Vec<String> {
    bundle["entry"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e["resource"]["url"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

mod test_paging {
    use super::*;

    // PK-I01: count=0 on a 7-entry closure reports the total and keeps every entry
    #[tokio::test]
    async fn test_count_zero_reports_total() {
        let app = TestApp::new(closure(6));
        let count = parameters(&[("count", "valueInteger", json!(0))]);

        let (status, bundle) = app.operation("/Library/root/$package", count).await;

        assert_eq!(status, StatusCode::OK, "{bundle}");
        assert_eq!(bundle["type"], "searchset");
        assert_eq!(bundle["total"], 7);
        assert_eq!(entry_urls(&bundle).len(), 7);
        assert!(app.repo.recorded_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_negative_offset_is_invalid() {
        let app = TestApp::new(closure(1));
        let offset = parameters(&[("offset", "valueInteger", json!(-1))]);

        let (status, body) = app.operation("/Library/root/$package", offset).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
    }
}

mod test_graph {
    use super::*;

    // PK-I02: a dependency cycle is walked once per url and terminates
    #[tokio::test]
    async fn test_cycle_is_visited_once() {
        let root = library("root", "1.0.0", ArtifactStatus::Active)
            .with_related_artifact(RelatedArtifact::depends_on("http://x.org/Library/a"));
        let a = library("a", "1.0.0", ArtifactStatus::Active)
            .with_related_artifact(RelatedArtifact::component("http://x.org/Library/b", true));
        let b = library("b", "1.0.0", ArtifactStatus::Active)
            .with_related_artifact(RelatedArtifact::depends_on("http://x.org/Library/root"))
            .with_related_artifact(RelatedArtifact::depends_on("http://x.org/Library/a|1.0.0"));
        let app = TestApp::new([root, a, b]);

        let (status, bundle) = app
            .operation("/Library/root/$package", no_parameters())
            .await;

        assert_eq!(status, StatusCode::OK, "{bundle}");
        let urls = entry_urls(&bundle);
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0], "http://x.org/Library/root");
        let unique: HashSet<&String> = urls.iter().collect();
        assert_eq!(unique.len(), urls.len());
    }
}

mod test_version_policy {
    use super::*;

    // PK-I03: checkArtifactVersion wins over force and canonical lists for the same url
    #[tokio::test]
    async fn test_check_takes_precedence() {
        let app = TestApp::new(closure(1));
        let policy = parameters(&[
            ("checkArtifactVersion", "valueCanonical", json!("http://x.org/Library/dep0|2.0.0")),
            ("forceArtifactVersion", "valueCanonical", json!("http://x.org/Library/dep0|2.0.0")),
            ("artifactVersion", "valueCanonical", json!("http://x.org/Library/dep0|2.0.0")),
        ]);

        let (status, body) = app.operation("/Library/root/$package", policy).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    }

    // PK-I04: force overwrites, artifactVersion leaves an existing version alone
    #[tokio::test]
    async fn test_force_and_canonical_versions() {
        let app = TestApp::new(closure(2));
        let policy = parameters(&[
            ("forceArtifactVersion", "valueCanonical", json!("http://x.org/Library/dep0|3.0.0")),
            ("artifactVersion", "valueCanonical", json!("http://x.org/Library/dep1|9.9.9")),
        ]);

        let (status, bundle) = app.operation("/Library/root/$package", policy).await;

        assert_eq!(status, StatusCode::OK, "{bundle}");
        let dep0 = entry_resource(&bundle, "http://x.org/Library/dep0").unwrap();
        assert_eq!(dep0["version"], "3.0.0");
        let dep1 = entry_resource(&bundle, "http://x.org/Library/dep1").unwrap();
        assert_eq!(dep1["version"], "1.0.0");
    }
}

mod test_expansion {
    use super::*;

    // PK-I05: a grouping value set is the deduplicated union of its children
    #[tokio::test]
    async fn test_grouping_union_is_deduplicated() {
        let root = library("root", "1.0.0", ArtifactStatus::Active)
            .with_related_artifact(RelatedArtifact::depends_on("http://x.org/ValueSet/group"));
        let app = TestApp::new([
            root,
            grouping_value_set("group", &["left", "right"]),
            enumerated_value_set("left", &["1", "2", "3"]),
            enumerated_value_set("right", &["2", "3", "4"]),
        ]);

        let (status, bundle) = app
            .operation("/Library/root/$package", no_parameters())
            .await;

        assert_eq!(status, StatusCode::OK, "{bundle}");
        let group = entry_resource(&bundle, "http://x.org/ValueSet/group").unwrap();
        let contains = group["expansion"]["contains"].as_array().unwrap();
        let codes: HashSet<&str> = contains.iter().filter_map(|c| c["code"].as_str()).collect();
        assert_eq!(contains.len(), 4);
        assert_eq!(codes, HashSet::from(["1", "2", "3", "4"]));

        // children were listed locally, so the union is naive too
        let naive = group["expansion"]["parameter"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p["name"] == "naive" && p["valueBoolean"] == true);
        assert!(naive);
        assert!(!app.cache.is_empty());
    }
}
