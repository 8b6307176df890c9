//! In-memory repository gateway
//!
//! Transactions are applied to a copy of the store and swapped in only when every
//! entry succeeds. Failures can be programmed to exercise retry and rollback paths,
//! and every transaction and delete is recorded for test assertions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crmi_common::canonical;
use crmi_domain::{
    Artifact, ArtifactAssessment, ArtifactStatus, Bundle, BundleEntry, BundleResponse,
    BundleType, HttpVerb, ASSESSMENT_RESOURCE_TYPE,
};
use uuid::Uuid;

use super::{RepositoryError, RepositoryGateway};

#[derive(Debug, Default)]
struct FailurePlan {
    transaction_calls: usize,
    /// Every transaction call from this (1-based) call number on fails
    fail_from: Option<usize>,
    /// Number of upcoming transaction calls that fail
    fail_next: usize,
    /// `Type/id` references whose delete fails
    fail_deletes: HashSet<String>,
}

impl FailurePlan {
    fn next_transaction_fails(&mut self) -> bool {
        self.transaction_calls += 1;
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return true;
        }
        self.fail_from
            .is_some_and(|from| self.transaction_calls >= from)
    }
}

/// In-process repository with programmable failures
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    resources: Arc<RwLock<Vec<Artifact>>>,
    transactions: Arc<Mutex<Vec<Bundle>>>,
    deletes: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<FailurePlan>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository seeded with the given resources
    pub fn with_resources(resources: impl IntoIterator<Item = Artifact>) -> Self {
        let repository = Self::new();
        for resource in resources {
            repository.insert(resource);
        }
        repository
    }

    /// Store a resource directly, replacing any resource with the same type and id
    pub fn insert(&self, resource: Artifact) {
        let mut resources = self.resources.write().unwrap_or_else(PoisonError::into_inner);
        upsert(&mut resources, resource);
    }

    pub fn get(&self, resource_type: &str, id: &str) -> Option<Artifact> {
        self.snapshot()
            .into_iter()
            .find(|r| is_addressed_by(r, resource_type, id))
    }

    pub fn all(&self) -> Vec<Artifact> {
        self.snapshot()
    }

    pub fn count(&self) -> usize {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every transaction bundle submitted, including failed ones
    pub fn recorded_transactions(&self) -> Vec<Bundle> {
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `Type/id` of every delete requested outside a transaction
    pub fn recorded_deletes(&self) -> Vec<String> {
        self.deletes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fail the `call`-th transaction (1-based) and every one after it
    pub fn fail_transactions_from(&self, call: usize) {
        self.failure_plan().fail_from = Some(call);
    }

    /// Fail the next `count` transactions
    pub fn fail_next_transactions(&self, count: usize) {
        self.failure_plan().fail_next = count;
    }

    /// Fail deletes of the given `Type/id`
    pub fn fail_delete(&self, reference: &str) {
        self.failure_plan()
            .fail_deletes
            .insert(reference.to_string());
    }

    /// Clear stored resources, recordings, and programmed failures.
    pub fn reset(&self) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.deletes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.failure_plan() = FailurePlan::default();
    }

    /// Inspection helpers read through a poisoned lock; the store is only ever swapped
    /// whole, so it is consistent even after a writer panicked.
    fn snapshot(&self) -> Vec<Artifact> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn failure_plan(&self) -> MutexGuard<'_, FailurePlan> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_store(&self) -> Result<Vec<Artifact>, RepositoryError> {
        Ok(self
            .resources
            .read()
            .map_err(|e| RepositoryError::Request(format!("resources lock poisoned: {e}")))?
            .clone())
    }
}

fn is_addressed_by(resource: &Artifact, resource_type: &str, id: &str) -> bool {
    resource.resource_type == resource_type && resource.id.as_deref() == Some(id)
}

fn matches(resource: &Artifact, reference: &str, status: Option<ArtifactStatus>) -> bool {
    resource.url.is_some()
        && resource.url() == canonical::url_part(reference)
        && canonical::version_part(reference).is_none_or(|v| resource.version() == Some(v))
        && canonical::resource_type_of(reference).is_none_or(|t| resource.resource_type == t)
        && status.is_none_or(|s| resource.status() == s)
}

/// Replace the resource with the same type and id, or append it; true when it was new
fn upsert(store: &mut Vec<Artifact>, resource: Artifact) -> bool {
    let id = resource.id.clone().unwrap_or_default();
    match store
        .iter_mut()
        .find(|r| is_addressed_by(r, &resource.resource_type, &id))
    {
        Some(existing) => {
            *existing = resource;
            false
        }
        None => {
            store.push(resource);
            true
        }
    }
}

/// A `url|version` may be stored only once per resource type
fn ensure_unique(store: &[Artifact], resource: &Artifact) -> Result<(), RepositoryError> {
    if resource.url.is_none() {
        return Ok(());
    }
    let clash = store.iter().any(|existing| {
        existing.resource_type == resource.resource_type
            && existing.url == resource.url
            && existing.version() == resource.version()
            && existing.id != resource.id
    });
    if clash {
        return Err(RepositoryError::Conflict(format!(
            "{} {} already exists",
            resource.resource_type,
            resource.canonical()
        )));
    }
    Ok(())
}

fn split_reference(reference: &str) -> Result<(&str, &str), RepositoryError> {
    reference
        .trim_matches('/')
        .split_once('/')
        .filter(|(resource_type, id)| !resource_type.is_empty() && !id.is_empty())
        .ok_or_else(|| RepositoryError::Request(format!("Invalid resource reference: {}", reference)))
}

fn written(status: &str, resource: Artifact) -> BundleEntry {
    let location = resource
        .reference()
        .map(|reference| format!("{}/_history/1", reference));
    BundleEntry {
        full_url: None,
        resource: Some(resource),
        request: None,
        response: Some(BundleResponse {
            status: status.to_string(),
            location,
        }),
    }
}

fn apply(store: &mut Vec<Artifact>, bundle: &Bundle) -> Result<Bundle, RepositoryError> {
    let mut response = Bundle::new(BundleType::TransactionResponse);
    for entry in &bundle.entry {
        let request = entry.request.as_ref().ok_or_else(|| {
            RepositoryError::Request("Transaction entry without a request".to_string())
        })?;
        match request.method {
            HttpVerb::Post => {
                let mut resource = entry.resource.clone().ok_or_else(|| {
                    RepositoryError::Request(format!("POST {} without a resource", request.url))
                })?;
                if resource.id.is_none() || resource.has_temporary_id() {
                    resource.id = Some(Uuid::new_v4().to_string());
                }
                ensure_unique(store, &resource)?;
                upsert(store, resource.clone());
                response.push(written("201 Created", resource));
            }
            HttpVerb::Put => {
                let mut resource = entry.resource.clone().ok_or_else(|| {
                    RepositoryError::Request(format!("PUT {} without a resource", request.url))
                })?;
                if resource.id.is_none() {
                    let (_, id) = split_reference(&request.url)?;
                    resource.id = Some(id.to_string());
                }
                ensure_unique(store, &resource)?;
                let status = if upsert(store, resource.clone()) {
                    "201 Created"
                } else {
                    "200 OK"
                };
                response.push(written(status, resource));
            }
            HttpVerb::Delete => {
                let (resource_type, id) = split_reference(&request.url)?;
                store.retain(|r| !is_addressed_by(r, resource_type, id));
                response.push(BundleEntry {
                    full_url: None,
                    resource: None,
                    request: None,
                    response: Some(BundleResponse {
                        status: "204 No Content".to_string(),
                        location: None,
                    }),
                });
            }
            HttpVerb::Get => {
                return Err(RepositoryError::Request(
                    "GET entries are not supported in transactions".to_string(),
                ));
            }
        }
    }
    Ok(response)
}

#[async_trait::async_trait]
impl RepositoryGateway for InMemoryRepository {
    async fn search(
        &self,
        reference: &str,
        status: Option<ArtifactStatus>,
    ) -> Result<Vec<Artifact>, RepositoryError> {
        let found: Vec<Artifact> = self
            .read_store()?
            .into_iter()
            .filter(|r| matches(r, reference, status))
            .collect();
        tracing::debug!(reference = %reference, matches = found.len(), "In-memory search");
        Ok(found)
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Artifact, RepositoryError> {
        self.read_store()?
            .into_iter()
            .find(|r| is_addressed_by(r, resource_type, id))
            .ok_or_else(|| RepositoryError::NotFound(format!("{}/{}", resource_type, id)))
    }

    async fn create(&self, mut resource: Artifact) -> Result<Artifact, RepositoryError> {
        let mut store = self
            .resources
            .write()
            .map_err(|e| RepositoryError::Request(format!("resources lock poisoned: {e}")))?;
        if resource.id.is_none() || resource.has_temporary_id() {
            resource.id = Some(Uuid::new_v4().to_string());
        }
        ensure_unique(&store, &resource)?;
        upsert(&mut store, resource.clone());
        Ok(resource)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), RepositoryError> {
        let reference = format!("{}/{}", resource_type, id);
        self.deletes
            .lock()
            .map_err(|e| RepositoryError::Request(format!("deletes lock poisoned: {e}")))?
            .push(reference.clone());

        let fails = self
            .failures
            .lock()
            .map_err(|e| RepositoryError::Request(format!("failures lock poisoned: {e}")))?
            .fail_deletes
            .contains(&reference);
        if fails {
            return Err(RepositoryError::Response(format!(
                "simulated delete failure for {}",
                reference
            )));
        }

        let mut store = self
            .resources
            .write()
            .map_err(|e| RepositoryError::Request(format!("resources lock poisoned: {e}")))?;
        let before = store.len();
        store.retain(|r| !is_addressed_by(r, resource_type, id));
        if store.len() == before {
            return Err(RepositoryError::NotFound(reference));
        }
        Ok(())
    }

    async fn transaction(&self, bundle: Bundle) -> Result<Bundle, RepositoryError> {
        let call = {
            let mut transactions = self.transactions.lock().map_err(|e| {
                RepositoryError::Request(format!("transactions lock poisoned: {e}"))
            })?;
            transactions.push(bundle.clone());
            transactions.len()
        };

        let fails = self
            .failures
            .lock()
            .map_err(|e| RepositoryError::Request(format!("failures lock poisoned: {e}")))?
            .next_transaction_fails();
        if fails {
            tracing::debug!(call, entries = bundle.len(), "In-memory transaction: simulated failure");
            return Err(RepositoryError::Unavailable(format!(
                "simulated failure of transaction {}",
                call
            )));
        }

        let mut store = self
            .resources
            .write()
            .map_err(|e| RepositoryError::Request(format!("resources lock poisoned: {e}")))?;
        let mut staged = store.clone();
        let response = apply(&mut staged, &bundle)?;
        *store = staged;
        tracing::debug!(call, entries = bundle.len(), "In-memory transaction committed");
        Ok(response)
    }

    async fn search_assessments(&self, canonical: &str) -> Result<Vec<Artifact>, RepositoryError> {
        let mut found = Vec::new();
        for resource in self.read_store()? {
            if resource.resource_type != ASSESSMENT_RESOURCE_TYPE {
                continue;
            }
            let assessment = ArtifactAssessment::from_artifact(&resource)
                .map_err(|e| RepositoryError::Response(e.to_string()))?;
            if assessment.targets(canonical) {
                found.push(resource);
            }
        }
        Ok(found)
    }
}
