//! Addon configuration file
//!
//! Plain `KEY=VALUE` lines. Blank lines and lines starting with `#` or `;`
//! are comments; unknown keys are ignored. `SERVER_URI` is the only required
//! key.
//!
//! ```text
//! SERVER_URI=http://gpu-box:5000
//! DEMUCS_MODEL=htdemucs_ft
//! POLL_INTERVAL=5
//! TIMEOUT=1800
//! REQUEST_TIMEOUT=300
//! ```

use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{ClientError, Result};

pub const DEFAULT_MODEL: &str = "htdemucs_ft";

/// Resolved client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_uri: Url,
    /// `None` lets the server pick its default model
    pub model: Option<String>,
    /// Pause between status checks
    pub poll_interval: Duration,
    /// Longest wait for one job to finish and its stems to download
    pub timeout: Duration,
    /// Longest single HTTP request, upload and download included
    pub request_timeout: Duration,
    /// Extra attempts for the result download after a transport error
    pub download_retries: u32,
    pub retry_delay: Duration,
}

impl ClientConfig {
    /// Defaults for everything except the server address
    pub fn new(server_uri: &str) -> Result<Self> {
        Ok(Self {
            server_uri: parse_server_uri(server_uri)?,
            model: Some(DEFAULT_MODEL.to_string()),
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(5 * 60),
            download_retries: 3,
            retry_delay: Duration::from_secs(5),
        })
    }

    /// Read and parse a config file. A missing file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut server_uri = None;
        let mut model = None;
        let mut poll_interval = None;
        let mut timeout = None;
        let mut request_timeout = None;
        let mut download_retries = None;
        let mut retry_delay = None;

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim().trim_start_matches('\u{feff}');
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = number + 1, "Ignoring config line without '='");
                continue;
            };
            let value = value.trim();

            match key.trim().to_ascii_uppercase().as_str() {
                "SERVER_URI" => server_uri = Some(value.to_string()),
                "DEMUCS_MODEL" => model = Some(value.to_string()),
                "POLL_INTERVAL" => poll_interval = Some(parse_seconds("POLL_INTERVAL", value)?),
                "TIMEOUT" => timeout = Some(parse_seconds("TIMEOUT", value)?),
                "REQUEST_TIMEOUT" => {
                    request_timeout = Some(parse_seconds("REQUEST_TIMEOUT", value)?)
                }
                "DOWNLOAD_RETRIES" => {
                    download_retries = Some(value.parse::<u32>().map_err(|_| {
                        ClientError::Config(format!(
                            "DOWNLOAD_RETRIES must be a whole number, got '{}'",
                            value
                        ))
                    })?)
                }
                "RETRY_DELAY" => retry_delay = Some(parse_seconds("RETRY_DELAY", value)?),
                other => tracing::debug!(key = other, "Ignoring unknown config key"),
            }
        }

        let server_uri = server_uri
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| ClientError::Config("SERVER_URI is not set".to_string()))?;

        let mut config = Self::new(&server_uri)?;
        if let Some(model) = model {
            config.model = match model.as_str() {
                "" => config.model,
                m if m.eq_ignore_ascii_case("default") => None,
                m => Some(m.to_string()),
            };
        }
        if let Some(interval) = poll_interval {
            if interval.is_zero() {
                return Err(ClientError::Config("POLL_INTERVAL must be positive".to_string()));
            }
            config.poll_interval = interval;
        }
        if let Some(timeout) = timeout {
            config.timeout = timeout;
        }
        if let Some(limit) = request_timeout {
            if limit.is_zero() {
                return Err(ClientError::Config("REQUEST_TIMEOUT must be positive".to_string()));
            }
            config.request_timeout = limit;
        }
        if let Some(retries) = download_retries {
            config.download_retries = retries;
        }
        if let Some(delay) = retry_delay {
            config.retry_delay = delay;
        }
        Ok(config)
    }
}

fn parse_server_uri(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ClientError::Config(format!("SERVER_URI '{}' is invalid: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ClientError::Config(format!(
            "SERVER_URI '{}' must be an http:// or https:// address",
            raw
        )));
    }
    Ok(url)
}

/// Seconds, fractions allowed
fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    value
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| {
            ClientError::Config(format!("{} must be a number of seconds, got '{}'", key, value))
        })
}
