//! Configuration management following 12-factor app principles
//!
//! All configuration is loaded from environment variables to ensure
//! clean separation between code and config.

use anyhow::Result;
use std::env;
use std::str::FromStr;

/// Default resource count at which publishing switches to batches
pub const DEFAULT_BATCH_THRESHOLD: usize = 500;
/// Default number of resources per publish batch
pub const DEFAULT_BATCH_SIZE: usize = 500;
/// Default number of attempts per publish submission
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Public FHIR package registry
pub const DEFAULT_PACKAGE_REGISTRY_URL: &str = "https://packages.fhir.org";

#[derive(Clone)]
pub struct Config {
    /// Repository gateway provider (memory, fhir)
    pub repository_provider: String,
    pub repository_base_url: String,

    /// Terminology client provider (mock, fhir)
    pub terminology_provider: String,
    /// Default terminology endpoint used for expansion delegation
    pub terminology_endpoint: Option<String>,
    pub terminology_api_key: Option<String>,

    /// Schema version of the artifact model (R4, DSTU3)
    pub fhir_version: String,

    /// Publish strategy tuning
    pub publish_batch_threshold: usize,
    pub publish_batch_size: usize,
    pub publish_max_retries: u32,

    /// Package registry fetched for unresolved implementation guide dependencies
    pub package_registry_url: String,
    /// Package downloader timeouts
    pub package_connect_timeout_secs: u64,
    pub package_read_timeout_secs: u64,

    /// Runtime configuration
    pub rust_log: String,
    pub port: u16,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("repository_provider", &self.repository_provider)
            .field("repository_base_url", &self.repository_base_url)
            .field("terminology_provider", &self.terminology_provider)
            .field("terminology_endpoint", &self.terminology_endpoint)
            .field(
                "terminology_api_key",
                &self.terminology_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("fhir_version", &self.fhir_version)
            .field("publish_batch_threshold", &self.publish_batch_threshold)
            .field("publish_batch_size", &self.publish_batch_size)
            .field("publish_max_retries", &self.publish_max_retries)
            .field("package_registry_url", &self.package_registry_url)
            .field("package_connect_timeout_secs", &self.package_connect_timeout_secs)
            .field("package_read_timeout_secs", &self.package_read_timeout_secs)
            .field("rust_log", &self.rust_log)
            .field("port", &self.port)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let config = Self {
            repository_provider: env::var("REPOSITORY_PROVIDER")
                .unwrap_or_else(|_| "memory".to_string()),
            repository_base_url: env::var("REPOSITORY_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/fhir".to_string()),

            terminology_provider: env::var("TERMINOLOGY_PROVIDER")
                .unwrap_or_else(|_| "mock".to_string()),
            terminology_endpoint: env::var("TERMINOLOGY_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            terminology_api_key: env::var("TERMINOLOGY_API_KEY").ok(),

            fhir_version: env::var("FHIR_VERSION").unwrap_or_else(|_| "R4".to_string()),

            publish_batch_threshold: parse_var("PUBLISH_BATCH_THRESHOLD", DEFAULT_BATCH_THRESHOLD)?,
            publish_batch_size: parse_var("PUBLISH_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            publish_max_retries: parse_var("PUBLISH_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,

            package_registry_url: env::var("PACKAGE_REGISTRY_URL")
                .unwrap_or_else(|_| DEFAULT_PACKAGE_REGISTRY_URL.to_string()),
            package_connect_timeout_secs: parse_var("PACKAGE_CONNECT_TIMEOUT_SECS", 10)?,
            package_read_timeout_secs: parse_var("PACKAGE_READ_TIMEOUT_SECS", 30)?,

            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "crmi=debug".to_string()),
            port: parse_var("PORT", 3000)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.publish_batch_size == 0 {
            anyhow::bail!("PUBLISH_BATCH_SIZE must be greater than zero");
        }
        if self.publish_max_retries == 0 {
            anyhow::bail!("PUBLISH_MAX_RETRIES must be greater than zero");
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 9] = [
        "REPOSITORY_PROVIDER",
        "TERMINOLOGY_PROVIDER",
        "TERMINOLOGY_ENDPOINT",
        "TERMINOLOGY_API_KEY",
        "PUBLISH_BATCH_THRESHOLD",
        "PUBLISH_BATCH_SIZE",
        "PUBLISH_MAX_RETRIES",
        "PACKAGE_REGISTRY_URL",
        "PORT",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();

        assert_eq!(config.repository_provider, "memory");
        assert_eq!(config.terminology_provider, "mock");
        assert_eq!(config.publish_batch_threshold, DEFAULT_BATCH_THRESHOLD);
        assert_eq!(config.publish_batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.publish_max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.package_connect_timeout_secs, 10);
        assert_eq!(config.package_read_timeout_secs, 30);
        assert_eq!(config.package_registry_url, DEFAULT_PACKAGE_REGISTRY_URL);
    }

    #[test]
    #[serial]
    fn test_config_overrides() {
        clear_env();
        env::set_var("PUBLISH_BATCH_THRESHOLD", "50");
        env::set_var("PUBLISH_MAX_RETRIES", "5");
        env::set_var("TERMINOLOGY_ENDPOINT", "http://tx.example.org/fhir");

        let config = Config::from_env().unwrap();
        assert_eq!(config.publish_batch_threshold, 50);
        assert_eq!(config.publish_max_retries, 5);
        assert_eq!(
            config.terminology_endpoint.as_deref(),
            Some("http://tx.example.org/fhir")
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_rejects_invalid_numbers() {
        clear_env();
        env::set_var("PUBLISH_BATCH_SIZE", "many");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("PUBLISH_BATCH_SIZE"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_batch_size() {
        clear_env();
        env::set_var("PUBLISH_BATCH_SIZE", "0");

        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_debug_redacts_api_key() {
        clear_env();
        env::set_var("TERMINOLOGY_API_KEY", "super-secret");

        let config = Config::from_env().unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
        clear_env();
    }
}
