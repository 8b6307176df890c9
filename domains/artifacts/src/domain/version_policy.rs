//! Caller-asserted artifact versions
//!
//! Three canonical lists, each matched against an artifact by url:
//! - `checkArtifactVersion`: the artifact's version must equal the asserted one
//! - `forceArtifactVersion`: the artifact's version is overwritten
//! - `artifactVersion`: fills in a missing version, never overrides one
//!
//! A check entry for a url takes precedence over force and canonical entries.

use crmi_common::canonical;
use crmi_common::{Error, Result};
use crmi_domain::Artifact;

use super::parameters::OperationParameters;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionPolicy {
    canonical: Vec<String>,
    check: Vec<String>,
    force: Vec<String>,
}

/// Version asserted for a url by the first matching list entry
fn asserted<'a>(entries: &'a [String], url: &str) -> Option<&'a str> {
    entries
        .iter()
        .filter(|entry| canonical::url_part(entry) == url)
        .find_map(|entry| canonical::version_part(entry))
}

impl VersionPolicy {
    pub fn new(canonical: Vec<String>, check: Vec<String>, force: Vec<String>) -> Self {
        Self {
            canonical,
            check,
            force,
        }
    }

    pub fn from_parameters(parameters: &OperationParameters) -> Self {
        Self::new(
            parameters.strings("artifactVersion"),
            parameters.strings("checkArtifactVersion"),
            parameters.strings("forceArtifactVersion"),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty() && self.check.is_empty() && self.force.is_empty()
    }

    /// Apply the first matching rule to the artifact's version
    pub fn apply(&self, artifact: &mut Artifact) -> Result<()> {
        let url = artifact.url().to_string();
        if url.is_empty() {
            return Ok(());
        }

        if let Some(expected) = asserted(&self.check, &url) {
            if artifact.version() != Some(expected) {
                return Err(Error::VersionMismatch(format!(
                    "Artifact '{}' has version '{}' but checkArtifactVersion requires '{}'",
                    url,
                    artifact.version().unwrap_or("none"),
                    expected
                )));
            }
            return Ok(());
        }

        if let Some(forced) = asserted(&self.force, &url) {
            tracing::debug!(url = %url, version = %forced, "Forcing artifact version");
            artifact.version = Some(forced.to_string());
            return Ok(());
        }

        if !artifact.has_version() {
            if let Some(version) = asserted(&self.canonical, &url) {
                artifact.version = Some(version.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://x.org/Library/lib";

    fn lib(version: Option<&str>) -> Artifact {
        let artifact = Artifact::new("Library", "lib", URL);
        match version {
            Some(v) => artifact.with_version(v),
            None => artifact,
        }
    }

    fn entry(version: &str) -> Vec<String> {
        vec![format!("{}|{}", URL, version)]
    }

    // VP-U01: check wins over force and canonical on mismatch
    #[test]
    fn test_check_takes_precedence() {
        let policy = VersionPolicy::new(entry("3.0.0"), entry("1.0.0"), entry("2.0.0"));
        let mut artifact = lib(Some("1.5.0"));
        assert!(matches!(
            policy.apply(&mut artifact),
            Err(Error::VersionMismatch(_))
        ));
        assert_eq!(artifact.version(), Some("1.5.0"));

        let mut matching = lib(Some("1.0.0"));
        policy.apply(&mut matching).unwrap();
        assert_eq!(matching.version(), Some("1.0.0"));
    }

    // VP-U02: force overwrites silently
    #[test]
    fn test_force_overwrites() {
        let policy = VersionPolicy::new(vec![], vec![], entry("2.0.0"));
        let mut artifact = lib(Some("1.0.0"));
        policy.apply(&mut artifact).unwrap();
        assert_eq!(artifact.version(), Some("2.0.0"));
    }

    // VP-U03: canonical fills only missing versions
    #[test]
    fn test_canonical_never_overrides() {
        let policy = VersionPolicy::new(entry("4.0.0"), vec![], vec![]);

        let mut versioned = lib(Some("1.0.0"));
        policy.apply(&mut versioned).unwrap();
        assert_eq!(versioned.version(), Some("1.0.0"));

        let mut unversioned = lib(None);
        policy.apply(&mut unversioned).unwrap();
        assert_eq!(unversioned.version(), Some("4.0.0"));
    }

    // VP-U04: entries for other urls do not apply
    #[test]
    fn test_other_urls_ignored() {
        let policy = VersionPolicy::new(
            vec![],
            vec!["http://x.org/Library/other|9.9.9".to_string()],
            vec![],
        );
        let mut artifact = lib(Some("1.0.0"));
        policy.apply(&mut artifact).unwrap();
        assert!(!policy.is_empty());
        assert!(VersionPolicy::default().is_empty());
    }
}
