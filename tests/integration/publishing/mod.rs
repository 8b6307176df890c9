//! Publish strategy integration tests (PB-I01 through PB-I02)

use std::sync::Arc;
use std::time::Duration;

use crmi_artifacts::repository::InMemoryRepository;
use crmi_artifacts::{PublishConfig, PublishStrategy, PublishStrategyKind};
use crmi_common::Error;
use crmi_domain::{Artifact, ArtifactStatus, Bundle};

use crate::common::library;

fn dependencies(count: usize) -> Vec<Artifact> {
    (1..=count)
        .map(|n| library(&format!("dep-{}", n), "1.0.0", ArtifactStatus::Active))
        .collect()
}

fn publisher(repo: &InMemoryRepository) -> PublishStrategy {
    PublishStrategy::new(
        Arc::new(repo.clone()),
        PublishConfig {
            backoff: Duration::ZERO,
            ..PublishConfig::default()
        },
    )
}

// PB-I01: 1 root + 600 dependencies go out as a root-only bundle and two batches
#[tokio::test]
async fn test_large_release_is_batched() {
    let repo = InMemoryRepository::new();
    let root = library("root", "1.0.0", ArtifactStatus::Active);

    let outcome = publisher(&repo)
        .publish(root, dependencies(600))
        .await
        .unwrap();

    assert_eq!(outcome.strategy, PublishStrategyKind::Batched);
    let sizes: Vec<usize> = repo.recorded_transactions().iter().map(Bundle::len).collect();
    assert_eq!(sizes, vec![1, 500, 100]);
    assert_eq!(outcome.persisted.len(), 601);
    assert_eq!(repo.count(), 601);
}

// PB-I02: batch 2 failing after batch 1 rolls back the primary bundle and batch 1
#[test_log::test(tokio::test)]
async fn test_failed_batch_is_rolled_back() {
    let repo = InMemoryRepository::new();
    repo.fail_transactions_from(3);
    let root = library("root", "1.0.0", ArtifactStatus::Active);

    let err = publisher(&repo)
        .publish(root, dependencies(600))
        .await
        .unwrap_err();

    let Error::Publish(failure) = err else {
        panic!("expected a publish failure");
    };
    assert_eq!(failure.rolled_back, 501);
    assert!(!failure.is_inconsistent());
    let deletes = repo.recorded_deletes();
    assert_eq!(deletes.len(), 501);
    assert_eq!(deletes[0], "Library/root");
    assert!(!deletes.contains(&"Library/dep-501".to_string()));
    assert_eq!(repo.count(), 0);
}
