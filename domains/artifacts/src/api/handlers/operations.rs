//! Lifecycle operation handler

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use crmi_common::{Error, Result};
use serde_json::Value;

use crate::api::middleware::ArtifactsState;
use crate::domain::parameters::OperationParameters;
use crate::visitors::{visitor_for, Operation};

/// Body of an operation request; an empty body means no parameters
fn parse_parameters(body: &[u8]) -> Result<OperationParameters> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(OperationParameters::new());
    }
    let raw: Value = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidRequest(format!("Request body is not valid JSON: {}", e)))?;
    OperationParameters::from_json(raw)
}

/// Run `$operation` on the stored artifact `resource_type/id`
pub async fn run_operation(
    State(state): State<ArtifactsState>,
    Path((resource_type, id, operation)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Json<Value>> {
    let operation: Operation = operation.parse()?;
    let parameters = parse_parameters(&body)?;
    let services = state.services;

    let artifact = services.repository.read(&resource_type, &id).await?;
    tracing::info!(
        operation = %operation,
        resource = %format!("{}/{}", resource_type, id),
        canonical = %artifact.canonical(),
        "Running operation"
    );

    let bundle = visitor_for(operation, services.clone())
        .visit(artifact, &parameters)
        .await?;
    Ok(Json(services.model.bundle_to_json(&bundle)?))
}
