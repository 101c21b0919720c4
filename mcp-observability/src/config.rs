//! Observability configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::{ObservabilityError, ObservabilityResult};

/// Default collector base URL
pub const DEFAULT_API_URL: &str = "http://localhost:3001";

/// Default HTTP timeout for trace submission
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 5;

/// Default number of retries for a failed trace submission
pub const DEFAULT_RETRIES: u32 = 2;

/// Default base delay between submission retries
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

/// Default number of trace events buffered for the background dispatcher
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Prefix carried by keys issued by the collector
pub const API_KEY_PREFIX: &str = "mcp_";

/// Header used by [`AuthScheme::ApiKeyHeader`]
pub const API_KEY_HEADER: &str = "x-api-key";

/// How the API key is presented to the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `X-API-Key: <key>`
    #[default]
    ApiKeyHeader,
    /// `Authorization: Bearer <key>`
    Bearer,
}

/// What to do when no API key is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// Submit traces without an authentication header
    #[default]
    SendUnauthenticated,
    /// Skip trace submission entirely; metrics are still recorded
    Disable,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Collector base URL; traces are posted to `{api_url}/traces`
    pub api_url: String,

    /// API key for authenticated submission (optional)
    pub api_key: Option<String>,

    /// How the API key is sent
    pub auth_scheme: AuthScheme,

    /// Behaviour when `api_key` is absent
    pub missing_key_policy: MissingKeyPolicy,

    /// Enable trace submission (metrics are always recorded)
    pub enabled: bool,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Number of retries for retryable submission failures
    pub max_retries: u32,

    /// Base backoff between retries in milliseconds, doubled per attempt
    pub retry_backoff_ms: u64,

    /// Capacity of the background trace queue
    pub queue_capacity: usize,

    /// Custom headers to include in requests
    pub headers: HashMap<String, String>,

    /// Redact sensitive values from trace context before submission
    pub sanitize_context: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            auth_scheme: AuthScheme::default(),
            missing_key_policy: MissingKeyPolicy::default(),
            enabled: true,
            timeout_secs: DEFAULT_TIMEOUT_SECONDS,
            max_retries: DEFAULT_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            headers: HashMap::new(),
            sanitize_context: true,
        }
    }
}

impl ObservabilityConfig {
    /// Configuration pointing at the given collector
    pub fn new<S: Into<String>>(api_url: S) -> Self {
        Self {
            api_url: api_url.into(),
            ..Default::default()
        }
    }

    /// Set the API key
    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the authentication scheme
    pub fn with_auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth_scheme = scheme;
        self
    }

    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ObservabilityResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ObservabilityError::configuration(format!("Failed to read config file: {e}"))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            ObservabilityError::configuration(format!("Failed to parse config file: {e}"))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> ObservabilityResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup using the
    /// `MCP_OBSERVABILITY_*` variable names
    pub fn from_lookup<F>(lookup: F) -> ObservabilityResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("MCP_OBSERVABILITY_API_URL") {
            config.api_url = url;
        }

        if let Some(key) = lookup("MCP_OBSERVABILITY_API_KEY") {
            let key = key.trim();
            if !key.is_empty() {
                config.api_key = Some(key.to_string());
            }
        }

        if let Some(enabled) = lookup("MCP_OBSERVABILITY_ENABLED") {
            config.enabled = parse_bool(&enabled).ok_or_else(|| {
                ObservabilityError::configuration(format!(
                    "Invalid MCP_OBSERVABILITY_ENABLED: {enabled}"
                ))
            })?;
        }

        if let Some(timeout) = lookup("MCP_OBSERVABILITY_TIMEOUT") {
            config.timeout_secs = timeout.parse().map_err(|e| {
                ObservabilityError::configuration(format!("Invalid MCP_OBSERVABILITY_TIMEOUT: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> ObservabilityResult<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ObservabilityError::configuration(
                "Collector API URL must start with http:// or https://",
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ObservabilityError::configuration(
                "Timeout must be greater than 0",
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ObservabilityError::configuration(
                "Queue capacity must be greater than 0",
            ));
        }

        if let Some(key) = &self.api_key {
            if !key.starts_with(API_KEY_PREFIX) {
                warn!(
                    "API key does not start with '{}'; the collector may reject it",
                    API_KEY_PREFIX
                );
            }
        }

        Ok(())
    }

    /// Collector base URL without trailing slashes
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// Full URL of the trace endpoint
    pub fn traces_url(&self) -> String {
        format!("{}/traces", self.base_url())
    }

    /// Whether traces should be posted at all
    pub fn submission_enabled(&self) -> bool {
        self.enabled
            && (self.api_key.is_some()
                || self.missing_key_policy == MissingKeyPolicy::SendUnauthenticated)
    }

    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get retry backoff as Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Build the default headers for collector requests
    pub fn trace_headers(&self) -> ObservabilityResult<reqwest::header::HeaderMap> {
        use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

        let mut headers = HeaderMap::new();

        // Custom headers first so auth cannot be overridden by accident
        for (key, value) in &self.headers {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Skipping invalid custom header '{}'", key),
            }
        }

        if let Some(api_key) = &self.api_key {
            let (name, value) = match self.auth_scheme {
                AuthScheme::ApiKeyHeader => {
                    (HeaderName::from_static(API_KEY_HEADER), api_key.clone())
                }
                AuthScheme::Bearer => (AUTHORIZATION, format!("Bearer {api_key}")),
            };
            let mut value = HeaderValue::from_str(&value).map_err(|e| {
                ObservabilityError::configuration(format!(
                    "API key is not a valid header value: {e}"
                ))
            })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        Ok(headers)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
