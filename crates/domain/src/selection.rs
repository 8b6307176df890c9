//! Picking "the latest" artifact out of a set of versions of the same url
//!
//! Ordering is by semantic version (highest wins); artifacts with equal versions are
//! ordered by resource id so the pick never depends on repository iteration order.

use std::cmp::Ordering;

use crmi_common::version::compare_versions;

use crate::entities::{Artifact, ArtifactStatus};

fn recency(left: &Artifact, right: &Artifact) -> Ordering {
    compare_versions(left.version(), right.version())
        .then_with(|| left.id.as_deref().cmp(&right.id.as_deref()))
}

/// Latest version of any status
pub fn latest<'a, I>(candidates: I) -> Option<&'a Artifact>
where
    I: IntoIterator<Item = &'a Artifact>,
{
    candidates.into_iter().max_by(|a, b| recency(a, b))
}

/// Latest version with the given status
pub fn latest_with_status<'a, I>(candidates: I, status: ArtifactStatus) -> Option<&'a Artifact>
where
    I: IntoIterator<Item = &'a Artifact>,
{
    latest(candidates.into_iter().filter(|a| a.status() == status))
}

/// Latest version whose status is anything but draft
pub fn latest_non_draft<'a, I>(candidates: I) -> Option<&'a Artifact>
where
    I: IntoIterator<Item = &'a Artifact>,
{
    latest(
        candidates
            .into_iter()
            .filter(|a| a.status() != ArtifactStatus::Draft),
    )
}

/// Latest active version, falling back to the latest non-draft one
pub fn latest_active_or_non_draft(candidates: &[Artifact]) -> Option<&Artifact> {
    latest_with_status(candidates, ArtifactStatus::Active).or_else(|| latest_non_draft(candidates))
}
