//! Canonical reference types and parsing
//!
//! Knowledge artifacts are addressed independently of their storage id:
//! - `{url}` - any version of the artifact
//! - `{url}|{version}` - one specific version
//!
//! The url of a canonical resource conventionally ends in `{ResourceType}/{id}`,
//! which is how resource types are inferred from bare references.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Separator between url and version in a canonical reference
pub const VERSION_SEPARATOR: char = '|';

/// A `url` or `url|version` canonical reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Canonical(String);

impl Canonical {
    /// Create a canonical from a string, validating format
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let canonical = Canonical(s.into());
        canonical.validate()?;
        Ok(canonical)
    }

    /// Compose a canonical from its parts; an empty version is treated as absent
    pub fn from_parts(url: &str, version: Option<&str>) -> Self {
        match version.filter(|v| !v.is_empty()) {
            Some(version) => Canonical(format!("{}{}{}", url, VERSION_SEPARATOR, version)),
            None => Canonical(url.to_string()),
        }
    }

    /// Get the raw canonical string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into url and optional version
    pub fn parse(&self) -> Result<CanonicalComponents> {
        let mut parts = self.0.split(VERSION_SEPARATOR);
        let url = parts.next().unwrap_or_default();
        let version = parts.next();

        if url.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "Canonical reference must have a url".to_string(),
            ));
        }
        if parts.next().is_some() {
            return Err(Error::InvalidRequest(format!(
                "Canonical reference '{}' has more than one version separator",
                self.0
            )));
        }
        if version.is_some_and(str::is_empty) {
            return Err(Error::InvalidRequest(format!(
                "Canonical reference '{}' has an empty version",
                self.0
            )));
        }

        Ok(CanonicalComponents {
            url: url.to_string(),
            version: version.map(str::to_string),
        })
    }

    fn validate(&self) -> Result<()> {
        self.parse().map(|_| ())
    }

    /// The url part
    pub fn url(&self) -> &str {
        url_part(&self.0)
    }

    /// The version part, if any
    pub fn version(&self) -> Option<&str> {
        version_part(&self.0)
    }

    /// Same url, different version
    pub fn with_version(&self, version: &str) -> Self {
        Self::from_parts(self.url(), Some(version))
    }

    /// Same url, version removed
    pub fn unversioned(&self) -> Self {
        Canonical(self.url().to_string())
    }

    /// Resource type inferred from the url path, e.g. `ValueSet` for `http://x.org/ValueSet/abc`
    pub fn resource_type(&self) -> Option<&str> {
        resource_type_of(&self.0)
    }

    /// Trailing id segment of the url path
    pub fn id_part(&self) -> Option<&str> {
        self.url()
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty() && !segment.contains(':'))
    }
}

/// Components of a parsed canonical reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalComponents {
    pub url: String,
    pub version: Option<String>,
}

/// Url part of a raw `url|version` string
pub fn url_part(reference: &str) -> &str {
    reference
        .split_once(VERSION_SEPARATOR)
        .map_or(reference, |(url, _)| url)
}

/// Version part of a raw `url|version` string
pub fn version_part(reference: &str) -> Option<&str> {
    reference
        .split_once(VERSION_SEPARATOR)
        .map(|(_, version)| version)
        .filter(|version| !version.is_empty())
}

/// Resource type inferred from the second-to-last path segment of the url.
///
/// Only segments that look like FHIR resource type names (leading uppercase ASCII letter)
/// are accepted.
pub fn resource_type_of(reference: &str) -> Option<&str> {
    let mut segments = url_part(reference).rsplit('/');
    let _id = segments.next()?;
    segments
        .next()
        .filter(|segment| segment.chars().next().is_some_and(|c| c.is_ascii_uppercase()))
        .filter(|segment| segment.chars().all(|c| c.is_ascii_alphanumeric()))
}

impl fmt::Display for Canonical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Canonical {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Canonical::new(s)
    }
}

impl From<Canonical> for String {
    fn from(canonical: Canonical) -> Self {
        canonical.0
    }
}

impl AsRef<str> for Canonical {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
