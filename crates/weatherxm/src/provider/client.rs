use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::Url;
use tracing::debug;
use tracing::warn;

use super::DeviceReference;
use super::snapshot::DeviceReport;

const USER_AGENT: &str = concat!("weatherxm/", env!("CARGO_PKG_VERSION"));

/// Why a device fetch failed.
///
/// Every variant carries the URL that was requested so log lines can be
/// traced back to a device without extra context.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("device not found at {url}")]
    NotFound { url: String },

    #[error("request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("failed to reach {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
}

impl FetchError {
    /// True when the provider could not be reached at all, as opposed to
    /// answering with something unusable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

/// Trait for fetching station data
///
/// This trait allows for mocking the provider for testing purposes
#[async_trait]
pub trait WeatherClient: Send + Sync {
    /// Fetch the latest observations and name of a station
    async fn fetch(&self, device: &DeviceReference) -> Result<DeviceReport, FetchError>;
}

/// Scripted client for testing
///
/// Responses are handed out in the order they were pushed. Once the script
/// runs out every call fails with a network error.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockWeatherClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<DeviceReport, FetchError>>>,
    requests: std::sync::Mutex<Vec<DeviceReference>>,
}

#[cfg(test)]
impl MockWeatherClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, report: DeviceReport) {
        self.responses.lock().unwrap().push_back(Ok(report));
    }

    pub fn push_err(&self, err: FetchError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    /// Number of fetches issued so far
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<DeviceReference> {
        self.requests.lock().unwrap().clone()
    }

    pub fn network_error() -> FetchError {
        FetchError::Network {
            url: "mock://weatherxm".to_string(),
            reason: "connection refused".to_string(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl WeatherClient for MockWeatherClient {
    async fn fetch(&self, device: &DeviceReference) -> Result<DeviceReport, FetchError> {
        self.requests.lock().unwrap().push(device.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Self::network_error()))
    }
}

/// Real client implementation using reqwest
#[derive(Debug, Clone)]
pub struct HttpWeatherClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpWeatherClient {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// Every request is bounded by `timeout`; hitting it is reported as
    /// [`FetchError::Timeout`].
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid API base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot carry a path: {}", base_url);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    /// `{base_url}/cells/{cell_index}/devices/{device_id}`, with both
    /// identifiers percent-encoded as path segments.
    pub fn device_url(&self, device: &DeviceReference) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "cells",
                device.cell_index.as_str(),
                "devices",
                device.device_id.as_str(),
            ]);
        }
        url
    }

    fn classify(&self, url: &Url, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl WeatherClient for HttpWeatherClient {
    async fn fetch(&self, device: &DeviceReference) -> Result<DeviceReport, FetchError> {
        let url = self.device_url(device);
        debug!("Fetching {}", url);

        let response = self.http.get(url.clone()).send().await.map_err(|e| {
            let err = self.classify(&url, e);
            warn!("{}", err);
            err
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!("Device not found: {} (status {})", url, status);
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        if status != StatusCode::OK {
            warn!("Failed to fetch device data from {}: status {}", url, status);
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            let err = self.classify(&url, e);
            warn!("{}", err);
            err
        })?;

        let report = DeviceReport::from_json(&body).map_err(|e| {
            warn!("Malformed device document from {}: {}", url, e);
            FetchError::MalformedResponse {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        debug!(
            "Fetched {} ({:?}): {} metrics at {:?}",
            device,
            report.name,
            report.snapshot.metrics.len(),
            report.snapshot.timestamp
        );
        Ok(report)
    }
}
