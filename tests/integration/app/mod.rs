//! Composition root integration tests (SRV-I01 through SRV-I04)

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
};
use crmi_common::config::{
    Config, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_THRESHOLD, DEFAULT_MAX_RETRIES,
};
use tower::ServiceExt;

use crate::common::{no_parameters, parse_body};

fn config() -> Config {
    Config {
        repository_provider: "memory".to_string(),
        repository_base_url: "http://localhost:8080/fhir".to_string(),
        terminology_provider: "mock".to_string(),
        terminology_endpoint: None,
        terminology_api_key: None,
        fhir_version: "R4".to_string(),
        publish_batch_threshold: DEFAULT_BATCH_THRESHOLD,
        publish_batch_size: DEFAULT_BATCH_SIZE,
        publish_max_retries: DEFAULT_MAX_RETRIES,
        package_registry_url: "https://packages.fhir.org".to_string(),
        package_connect_timeout_secs: 10,
        package_read_timeout_secs: 30,
        rust_log: "crmi=debug".to_string(),
        port: 3000,
    }
}

// SRV-I01: the health check answers OK
#[tokio::test]
async fn test_health_check() {
    let app = crmi_app::create_app(&config()).unwrap();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"OK");
}

// SRV-I02: operations are routed to the configured repository
#[tokio::test]
async fn test_operation_on_empty_repository() {
    let app = crmi_app::create_app(&config()).unwrap();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/Library/missing/$retire")
        .header("content-type", "application/fhir+json")
        .body(Body::from(no_parameters().to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = parse_body(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

// SRV-I03: unsupported providers and schema versions are configuration errors
#[test]
fn test_invalid_configuration() {
    let mut unknown_version = config();
    unknown_version.fhir_version = "R2".to_string();
    assert!(crmi_app::create_app(&unknown_version).is_err());

    let mut unknown_repository = config();
    unknown_repository.repository_provider = "sql".to_string();
    assert!(crmi_app::create_app(&unknown_repository).is_err());

    let mut unknown_terminology = config();
    unknown_terminology.terminology_provider = "ldap".to_string();
    assert!(crmi_app::create_app(&unknown_terminology).is_err());
}

// SRV-I04: the configured package registry backs $package
#[test]
fn test_services_carry_package_registry() {
    let mut custom = config();
    custom.package_registry_url = "http://registry.local/".to_string();
    let services = crmi_app::create_services(&custom).unwrap();

    let registry = services.packages.expect("package registry configured");
    assert_eq!(
        registry
            .archive_url("http://x.org/ImplementationGuide/x.pkg|1.0.0")
            .as_deref(),
        Some("http://registry.local/x.pkg/1.0.0")
    );
}
