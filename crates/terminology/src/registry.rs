//! Package registry
//!
//! Resolves an implementation guide canonical to the conformance resources published
//! in its package. The package id is the last path segment of the guide's url and an
//! unversioned canonical fetches the `latest` package. Archives are gzipped tarballs
//! with resources under `package/`.

use std::io::Read;
use std::sync::Arc;

use crmi_common::canonical;
use crmi_common::config::Config;
use crmi_domain::model::ArtifactModel;
use crmi_domain::Artifact;
use flate2::read::GzDecoder;
use tar::Archive;

use crate::downloader::{DownloaderConfig, PackageDownloader};
use crate::TerminologyError;

/// File name prefixes of the resources taken from a package
const EXTRACTED_PREFIXES: [&str; 4] = [
    "ValueSet-",
    "CodeSystem-",
    "StructureDefinition-",
    "ImplementationGuide-",
];

/// Package id of an implementation guide url: its last path segment
pub fn package_id(url: &str) -> Option<&str> {
    let (head, id) = url.trim_end_matches('/').rsplit_once('/')?;
    (!head.is_empty() && !id.is_empty()).then_some(id)
}

/// Fetches published packages from a FHIR package registry.
#[derive(Clone)]
pub struct PackageRegistry {
    downloader: PackageDownloader,
    base_url: String,
    model: Arc<dyn ArtifactModel>,
}

impl PackageRegistry {
    pub fn new(
        downloader: PackageDownloader,
        base_url: impl Into<String>,
        model: Arc<dyn ArtifactModel>,
    ) -> Self {
        Self {
            downloader,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
        }
    }

    /// Registry built from the application configuration
    pub fn from_config(
        config: &Config,
        model: Arc<dyn ArtifactModel>,
    ) -> Result<Self, TerminologyError> {
        let downloader = PackageDownloader::new(DownloaderConfig::from(config))?;
        Ok(Self::new(downloader, config.package_registry_url.as_str(), model))
    }

    /// Archive location of the package an implementation guide canonical names
    pub fn archive_url(&self, reference: &str) -> Option<String> {
        let id = package_id(canonical::url_part(reference))?;
        let version = canonical::version_part(reference).unwrap_or("latest");
        Some(format!("{}/{}/{}", self.base_url, id, version))
    }

    /// Resources of the package an implementation guide canonical names.
    ///
    /// Download failures yield no resources; a corrupt archive is an error.
    pub async fn fetch_resources(&self, reference: &str) -> Result<Vec<Artifact>, TerminologyError> {
        let Some(url) = self.archive_url(reference) else {
            tracing::debug!(reference = %reference, "No package id in reference");
            return Ok(Vec::new());
        };
        tracing::info!(reference = %reference, url = %url, "Fetching package from registry");
        let Some(archive) = self.downloader.download(&url).await else {
            return Ok(Vec::new());
        };
        let resources = self.extract_resources(&archive)?;
        tracing::info!(reference = %reference, resources = resources.len(), "Package resources extracted");
        Ok(resources)
    }

    /// Canonical resources under `package/` in a gzipped tarball.
    ///
    /// Entries that do not parse, or that have no url, are skipped.
    pub fn extract_resources(&self, archive: &[u8]) -> Result<Vec<Artifact>, TerminologyError> {
        let corrupt = |e: std::io::Error| TerminologyError::Response(format!("Corrupt package archive: {e}"));
        let mut tarball = Archive::new(GzDecoder::new(archive));
        let mut resources = Vec::new();
        for entry in tarball.entries().map_err(corrupt)? {
            let mut entry = entry.map_err(corrupt)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();
            let Some(file_name) = path.strip_prefix("package/") else {
                continue;
            };
            let extracted = file_name.ends_with(".json")
                && !file_name.contains('/')
                && EXTRACTED_PREFIXES.iter().any(|p| file_name.starts_with(p));
            if !extracted {
                continue;
            }

            let mut content = Vec::new();
            entry.read_to_end(&mut content).map_err(corrupt)?;
            let parsed = serde_json::from_slice::<serde_json::Value>(&content)
                .map_err(|e| e.to_string())
                .and_then(|raw| self.model.parse_artifact(raw).map_err(|e| e.to_string()));
            match parsed {
                Ok(resource) if resource.url.as_deref().is_some_and(|u| !u.is_empty()) => {
                    tracing::debug!(entry = %path, canonical = %resource.canonical(), "Extracted package resource");
                    resources.push(resource);
                }
                Ok(_) => tracing::debug!(entry = %path, "Package resource has no url; skipped"),
                Err(e) => tracing::debug!(entry = %path, error = %e, "Package resource did not parse; skipped"),
            }
        }
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmi_domain::model::R4Model;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;

    /// Gzipped tarball holding the given `(path, content)` files
    fn tgz(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_slice()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn registry() -> PackageRegistry {
        PackageRegistry::new(
            PackageDownloader::new(DownloaderConfig::default()).unwrap(),
            "https://packages.example.org/",
            Arc::new(R4Model),
        )
    }

    fn resource(resource_type: &str, id: &str, url: Option<&str>) -> Vec<u8> {
        let mut value = json!({ "resourceType": resource_type, "id": id, "status": "active" });
        if let Some(url) = url {
            value["url"] = json!(url);
            value["version"] = json!("1.0.0");
        }
        serde_json::to_vec(&value).unwrap()
    }

    // REG-U01: package id and archive location
    #[test]
    fn test_archive_url() {
        assert_eq!(
            package_id("http://hl7.org/fhir/us/core/ImplementationGuide/hl7.fhir.us.core"),
            Some("hl7.fhir.us.core")
        );
        assert_eq!(package_id("no-slashes"), None);
        assert_eq!(package_id("/lead"), None);

        let registry = registry();
        assert_eq!(
            registry
                .archive_url("http://hl7.org/fhir/us/core/ImplementationGuide/hl7.fhir.us.core|6.1.0")
                .as_deref(),
            Some("https://packages.example.org/hl7.fhir.us.core/6.1.0")
        );
        assert_eq!(
            registry
                .archive_url("http://x.org/ImplementationGuide/x.pkg")
                .as_deref(),
            Some("https://packages.example.org/x.pkg/latest")
        );
    }

    // REG-U02: only canonical resources of the extracted kinds under package/ are kept
    #[test]
    fn test_extract_resources() {
        let archive = tgz(&[
            ("package/package.json", br#"{"name":"x.pkg"}"#.to_vec()),
            (
                "package/ValueSet-a.json",
                resource("ValueSet", "a", Some("http://x.org/ValueSet/a")),
            ),
            (
                "package/CodeSystem-b.json",
                resource("CodeSystem", "b", Some("http://x.org/CodeSystem/b")),
            ),
            ("package/ValueSet-nourl.json", resource("ValueSet", "nourl", None)),
            ("package/ValueSet-broken.json", b"{ not json".to_vec()),
            (
                "package/Patient-p.json",
                resource("Patient", "p", Some("http://x.org/Patient/p")),
            ),
            (
                "package/other/ValueSet-c.json",
                resource("ValueSet", "c", Some("http://x.org/ValueSet/c")),
            ),
            (
                "other/ValueSet-d.json",
                resource("ValueSet", "d", Some("http://x.org/ValueSet/d")),
            ),
        ]);

        let resources = registry().extract_resources(&archive).unwrap();

        let canonicals: Vec<String> = resources.iter().map(|r| r.canonical().to_string()).collect();
        assert_eq!(
            canonicals,
            vec!["http://x.org/ValueSet/a|1.0.0", "http://x.org/CodeSystem/b|1.0.0"]
        );
    }

    // REG-U03: bytes that are not a gzipped tarball are an error
    #[test]
    fn test_corrupt_archive() {
        let err = registry().extract_resources(b"plain text").unwrap_err();
        assert!(matches!(err, TerminologyError::Response(_)));
    }
}
