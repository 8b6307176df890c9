//! Publishing of large dependency sets
//!
//! Small sets go out as one transaction with the root first. Sets at or above the
//! batch threshold go out as a root-only primary bundle followed by fixed-size
//! batches, submitted sequentially. Every submission is retried with exponential
//! backoff; when one finally fails, everything persisted by earlier submissions of the
//! same publish call is deleted again (best effort).

use std::sync::Arc;
use std::time::Duration;

use crmi_common::config::{
    Config, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_THRESHOLD, DEFAULT_MAX_RETRIES,
};
use crmi_common::{Error, PublishFailure, Result, RollbackFailure};
use crmi_domain::{Artifact, Bundle, BundleEntry, BundleType};
use tokio::time::sleep;

use crate::repository::{RepositoryError, RepositoryGateway};

/// Backoff base; attempt `n` waits `base * 2^n` before the next one
const BACKOFF_BASE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Total resource count (root included) from which batching kicks in
    pub batch_threshold: usize,
    pub batch_size: usize,
    /// Attempts per submission
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BACKOFF_BASE,
        }
    }
}

impl From<&Config> for PublishConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_threshold: config.publish_batch_threshold,
            batch_size: config.publish_batch_size,
            max_retries: config.publish_max_retries,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStrategyKind {
    /// Everything in one transaction
    Transaction,
    /// Root-only primary bundle, then fixed-size batches
    Batched,
}

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// `Type/id` of every persisted resource, in submission order
    pub persisted: Vec<String>,
    pub strategy: PublishStrategyKind,
    /// Number of bundles submitted
    pub batches: usize,
    /// Response of every submission, entries concatenated
    pub response: Bundle,
}

pub struct PublishStrategy {
    repository: Arc<dyn RepositoryGateway>,
    config: PublishConfig,
}

impl PublishStrategy {
    pub fn new(repository: Arc<dyn RepositoryGateway>, config: PublishConfig) -> Self {
        Self { repository, config }
    }

    /// Strategy chosen for a root plus `dependencies` resources
    pub fn kind_for(&self, dependencies: usize) -> PublishStrategyKind {
        if 1 + dependencies < self.config.batch_threshold {
            PublishStrategyKind::Transaction
        } else {
            PublishStrategyKind::Batched
        }
    }

    /// Persist the root and its dependencies as updates
    pub async fn publish(&self, root: Artifact, dependencies: Vec<Artifact>) -> Result<PublishOutcome> {
        let dependencies = dependencies.into_iter().map(BundleEntry::update).collect();
        self.publish_entries(BundleEntry::update(root), dependencies)
            .await
    }

    /// Persist prepared entries; `root` is always submitted first
    pub async fn publish_entries(
        &self,
        root: BundleEntry,
        dependencies: Vec<BundleEntry>,
    ) -> Result<PublishOutcome> {
        let strategy = self.kind_for(dependencies.len());
        tracing::info!(
            dependencies = dependencies.len(),
            strategy = ?strategy,
            "Publishing artifact"
        );

        let bundles = match strategy {
            PublishStrategyKind::Transaction => {
                let mut bundle = Bundle::transaction();
                bundle.push(root);
                for entry in dependencies {
                    bundle.push(entry);
                }
                vec![bundle]
            }
            PublishStrategyKind::Batched => {
                let mut primary = Bundle::transaction();
                primary.push(root);
                let mut bundles = vec![primary];
                let size = self.config.batch_size.max(1);
                let mut remaining = dependencies.into_iter().peekable();
                while remaining.peek().is_some() {
                    let mut batch = Bundle::transaction();
                    for entry in remaining.by_ref().take(size) {
                        batch.push(entry);
                    }
                    bundles.push(batch);
                }
                bundles
            }
        };

        let batches = bundles.len();
        let mut persisted = Vec::new();
        let mut response = Bundle::new(BundleType::TransactionResponse);

        for (index, bundle) in bundles.into_iter().enumerate() {
            match self.submit(bundle, index + 1).await {
                Ok(result) => {
                    persisted.extend(result.persisted_references());
                    response.entry.extend(result.entry);
                }
                Err(e) => {
                    tracing::error!(
                        batch = index + 1,
                        persisted = persisted.len(),
                        error = %e,
                        "Publish failed, rolling back"
                    );
                    return Err(Error::Publish(self.rollback(e.to_string(), &persisted).await));
                }
            }
        }

        tracing::info!(persisted = persisted.len(), batches, "Publish complete");
        Ok(PublishOutcome {
            persisted,
            strategy,
            batches,
            response,
        })
    }

    async fn submit(&self, bundle: Bundle, batch: usize) -> std::result::Result<Bundle, RepositoryError> {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.repository.transaction(bundle.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < attempts => {
                    let backoff = self.config.backoff * 2_u32.pow(attempt);
                    tracing::warn!(
                        batch,
                        attempt,
                        max_attempts = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transaction failed, retrying"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete everything persisted so far; delete failures are collected, not raised
    async fn rollback(&self, primary: String, persisted: &[String]) -> PublishFailure {
        let mut rolled_back = 0;
        let mut rollback_failures = Vec::new();

        for reference in persisted {
            let Some((resource_type, id)) = reference.split_once('/') else {
                rollback_failures.push(RollbackFailure {
                    resource: reference.clone(),
                    reason: "not a Type/id reference".to_string(),
                });
                continue;
            };
            match self.repository.delete(resource_type, id).await {
                Ok(()) => rolled_back += 1,
                Err(e) => {
                    tracing::warn!(resource = %reference, error = %e, "Rollback delete failed");
                    rollback_failures.push(RollbackFailure {
                        resource: reference.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        PublishFailure {
            primary,
            rolled_back,
            rollback_failures,
        }
    }
}
