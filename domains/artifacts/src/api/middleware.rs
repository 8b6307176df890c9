//! Artifacts domain state

use axum::extract::FromRef;

use crate::visitors::ArtifactServices;

/// Application state for the Artifacts domain
#[derive(Clone)]
pub struct ArtifactsState {
    pub services: ArtifactServices,
}

impl ArtifactsState {
    pub fn new(services: ArtifactServices) -> Self {
        Self { services }
    }
}

impl FromRef<ArtifactsState> for ArtifactServices {
    fn from_ref(state: &ArtifactsState) -> Self {
        state.services.clone()
    }
}
