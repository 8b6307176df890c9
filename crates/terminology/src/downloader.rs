//! Package archive downloader
//!
//! Fetches `.tgz` package archives over HTTP. Failures never propagate: the caller
//! gets `None` and the reason is logged.

use std::time::Duration;

use crmi_common::config::Config;

use crate::TerminologyError;

/// Downloader timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloaderConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for DownloaderConfig {
    fn from(config: &Config) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.package_connect_timeout_secs),
            read_timeout: Duration::from_secs(config.package_read_timeout_secs),
        }
    }
}

/// Downloads package archives.
#[derive(Debug, Clone)]
pub struct PackageDownloader {
    http: reqwest::Client,
}

impl PackageDownloader {
    pub fn new(config: DownloaderConfig) -> Result<Self, TerminologyError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| TerminologyError::Configuration(e.to_string()))?;
        Ok(Self { http })
    }

    /// Download the archive at `url`; `None` on any transport error, non-success
    /// status, or empty body.
    pub async fn download(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Package download failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = %status, "Package download returned an error status");
            return None;
        }

        match response.bytes().await {
            Ok(bytes) if bytes.is_empty() => {
                tracing::warn!(url = %url, "Package download returned an empty body");
                None
            }
            Ok(bytes) => {
                tracing::debug!(url = %url, size = bytes.len(), "Package downloaded");
                Some(bytes.to_vec())
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Package download body could not be read");
                None
            }
        }
    }
}
