//! Artifact version rules
//!
//! Release and draft versions follow `MAJOR.MINOR.PATCH`; drafts carry a `-draft` suffix.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

use crate::error::{Error, Result};

/// Suffix appended to the version of a drafted artifact
pub const DRAFT_SUFFIX: &str = "-draft";

static SEMVER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.)(\d+\.)(\*|\d+)$").expect("semantic version regex is valid")
});

/// Validate a caller-supplied `MAJOR.MINOR.PATCH` version
pub fn validate_version(version: &str) -> Result<()> {
    if version.trim().is_empty() {
        return Err(Error::PreconditionFailed("The version argument is required".to_string()));
    }
    if version.contains("draft") {
        return Err(Error::PreconditionFailed(
            "The version cannot contain 'draft'".to_string(),
        ));
    }
    if version.contains('/') || version.contains('\\') || version.contains('|') {
        return Err(Error::PreconditionFailed(
            "The version contains illegal characters".to_string(),
        ));
    }
    if !SEMVER_REGEX.is_match(version) {
        return Err(Error::PreconditionFailed(
            "The version must be in the format MAJOR.MINOR.PATCH".to_string(),
        ));
    }
    Ok(())
}

/// Draft version for a release version
pub fn draft_version(version: &str) -> String {
    format!("{}{}", version, DRAFT_SUFFIX)
}

/// Remove a trailing `-draft` suffix, if present
pub fn strip_draft_suffix(version: &str) -> &str {
    version.strip_suffix(DRAFT_SUFFIX).unwrap_or(version)
}

/// Whether the version is a draft version
pub fn is_draft_version(version: &str) -> bool {
    version.ends_with(DRAFT_SUFFIX)
}

/// Order two optional versions.
///
/// Dot-separated segments compare numerically when both are numeric and lexically
/// otherwise; a missing version sorts below any present one, and a version that is a
/// strict prefix of another sorts lower.
pub fn compare_versions(left: Option<&str>, right: Option<&str>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(left), Some(right)) => compare_present(left, right),
    }
}

fn compare_present(left: &str, right: &str) -> Ordering {
    let mut left_segments = left.split(['.', '-']);
    let mut right_segments = right.split(['.', '-']);
    loop {
        match (left_segments.next(), right_segments.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod validation {
        use super::*;

        #[test]
        fn test_valid_versions() {
            assert!(validate_version("1.0.0").is_ok());
            assert!(validate_version("10.20.30").is_ok());
            assert!(validate_version("1.2.*").is_ok());
        }

        #[test]
        fn test_empty_version_is_required() {
            let err = validate_version("").unwrap_err();
            assert!(err.to_string().contains("required"));
        }

        #[test]
        fn test_draft_in_version_rejected() {
            let err = validate_version("1.0.0-draft").unwrap_err();
            assert!(err.to_string().contains("draft"));
        }

        #[test]
        fn test_illegal_characters_rejected() {
            for version in ["1.0/0", "1.0\\0", "1.0|0"] {
                let err = validate_version(version).unwrap_err();
                assert!(
                    err.to_string().contains("illegal characters"),
                    "unexpected message for {}: {}",
                    version,
                    err
                );
            }
        }

        #[test]
        fn test_malformed_versions_rejected() {
            for version in ["1", "1.0", "1.0.0.0", "a.b.c", "1.0.0-beta", " 1.0.0"] {
                let err = validate_version(version).unwrap_err();
                assert!(matches!(err, Error::PreconditionFailed(_)));
                assert!(err.to_string().contains("MAJOR.MINOR.PATCH"));
            }
        }
    }

    mod draft_suffix {
        use super::*;

        #[test]
        fn test_draft_version_round_trip() {
            let draft = draft_version("1.2.3");
            assert_eq!(draft, "1.2.3-draft");
            assert!(is_draft_version(&draft));
            assert_eq!(strip_draft_suffix(&draft), "1.2.3");
        }

        #[test]
        fn test_strip_is_noop_without_suffix() {
            assert_eq!(strip_draft_suffix("1.2.3"), "1.2.3");
            assert!(!is_draft_version("1.2.3"));
        }
    }

    mod ordering {
        use super::*;

        #[test]
        fn test_numeric_segments_compare_numerically() {
            assert_eq!(compare_versions(Some("1.10.0"), Some("1.9.0")), Ordering::Greater);
            assert_eq!(compare_versions(Some("2.0.0"), Some("10.0.0")), Ordering::Less);
            assert_eq!(compare_versions(Some("1.0.0"), Some("1.0.0")), Ordering::Equal);
        }

        #[test]
        fn test_missing_versions_sort_lowest() {
            assert_eq!(compare_versions(None, Some("0.0.1")), Ordering::Less);
            assert_eq!(compare_versions(Some("0.0.1"), None), Ordering::Greater);
            assert_eq!(compare_versions(None, None), Ordering::Equal);
        }

        #[test]
        fn test_prefix_sorts_lower() {
            assert_eq!(compare_versions(Some("1.0"), Some("1.0.0")), Ordering::Less);
            assert_eq!(compare_versions(Some("1.0.0"), Some("1.0.0-draft")), Ordering::Less);
        }

        #[test]
        fn test_non_numeric_segments_compare_lexically() {
            assert_eq!(compare_versions(Some("1.0.a"), Some("1.0.b")), Ordering::Less);
        }
    }
}
