//! Transaction bundles: ordered collections of (resource, operation) pairs

use serde::{Deserialize, Serialize};

use crate::entities::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Transaction,
    TransactionResponse,
    Batch,
    BatchResponse,
    Collection,
    Searchset,
}

impl std::fmt::Display for BundleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transaction => write!(f, "transaction"),
            Self::TransactionResponse => write!(f, "transaction-response"),
            Self::Batch => write!(f, "batch"),
            Self::BatchResponse => write!(f, "batch-response"),
            Self::Collection => write!(f, "collection"),
            Self::Searchset => write!(f, "searchset"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRequest {
    pub method: HttpVerb,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl BundleResponse {
    /// `Type/id` part of the location, with any `/_history/..` suffix removed
    pub fn resource_reference(&self) -> Option<String> {
        let location = self.location.as_deref()?;
        let location = location
            .split_once("/_history")
            .map_or(location, |(head, _)| head);
        let mut segments = location.trim_end_matches('/').rsplit('/');
        let id = segments.next().filter(|s| !s.is_empty())?;
        let resource_type = segments.next().filter(|s| !s.is_empty())?;
        Some(format!("{}/{}", resource_type, id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleResponse>,
}

impl BundleEntry {
    /// Create entry: POST to the resource type, addressed by a temporary urn when the id is one
    pub fn create(resource: Artifact) -> Self {
        let full_url = resource
            .has_temporary_id()
            .then(|| resource.id.clone())
            .flatten();
        Self {
            full_url,
            request: Some(BundleRequest {
                method: HttpVerb::Post,
                url: resource.resource_type.clone(),
            }),
            resource: Some(resource),
            response: None,
        }
    }

    /// Update entry: PUT to `Type/id`
    pub fn update(resource: Artifact) -> Self {
        let url = resource
            .reference()
            .unwrap_or_else(|| resource.resource_type.clone());
        Self {
            full_url: None,
            request: Some(BundleRequest {
                method: HttpVerb::Put,
                url,
            }),
            resource: Some(resource),
            response: None,
        }
    }

    /// Delete entry for a `Type/id` reference
    pub fn delete(reference: impl Into<String>) -> Self {
        Self {
            full_url: None,
            resource: None,
            request: Some(BundleRequest {
                method: HttpVerb::Delete,
                url: reference.into(),
            }),
            response: None,
        }
    }

    /// Entry without a write request, as used in collections and search results
    pub fn plain(resource: Artifact) -> Self {
        Self {
            full_url: None,
            resource: Some(resource),
            request: None,
            response: None,
        }
    }

    pub fn method(&self) -> Option<HttpVerb> {
        self.request.as_ref().map(|r| r.method)
    }
}

/// An ordered, append-only set of entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: BundleType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

impl Bundle {
    pub fn new(kind: BundleType) -> Self {
        Self {
            resource_type: "Bundle".to_string(),
            id: None,
            kind,
            total: None,
            entry: Vec::new(),
        }
    }

    pub fn transaction() -> Self {
        Self::new(BundleType::Transaction)
    }

    pub fn push(&mut self, entry: BundleEntry) {
        self.entry.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
    }

    pub fn resources(&self) -> impl Iterator<Item = &Artifact> {
        self.entry.iter().filter_map(|e| e.resource.as_ref())
    }

    pub fn resources_mut(&mut self) -> impl Iterator<Item = &mut Artifact> {
        self.entry.iter_mut().filter_map(|e| e.resource.as_mut())
    }

    /// Entries whose request uses the given verb
    pub fn entries_with(&self, method: HttpVerb) -> impl Iterator<Item = &BundleEntry> {
        self.entry
            .iter()
            .filter(move |e| e.method() == Some(method))
    }

    /// Whether a resource with this `url|version` is already present
    pub fn contains_canonical(&self, url: &str, version: Option<&str>) -> bool {
        self.resources()
            .any(|r| r.url.as_deref() == Some(url) && r.version() == version)
    }

    /// Resource with the given url (any version)
    pub fn find_by_url(&self, url: &str) -> Option<&Artifact> {
        self.resources().find(|r| r.url.as_deref() == Some(url))
    }

    /// `Type/id` of every persisted resource reported in a transaction response
    pub fn persisted_references(&self) -> Vec<String> {
        self.entry
            .iter()
            .filter_map(|e| {
                e.response
                    .as_ref()
                    .and_then(BundleResponse::resource_reference)
                    .or_else(|| e.resource.as_ref().and_then(Artifact::reference))
            })
            .collect()
    }

    /// Remove write requests from every entry
    pub fn strip_requests(&mut self) {
        for entry in &mut self.entry {
            entry.request = None;
        }
    }
}
