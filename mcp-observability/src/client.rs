//! HTTP client for the trace collector

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::{ObservabilityConfig, ObservabilityError, ObservabilityResult, TraceEvent};

/// Filter for listing stored traces
#[derive(Debug, Clone, Default)]
pub struct TraceQuery {
    /// Only traces for this task
    pub task: Option<String>,
    /// Only traces owned by this collector user
    pub user_id: Option<String>,
    /// Only traces at or after this time
    pub from: Option<DateTime<Utc>>,
    /// Only traces at or before this time
    pub to: Option<DateTime<Utc>>,
}

impl TraceQuery {
    /// Query parameters understood by the collector
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(task) = &self.task {
            params.push(("task", task.clone()));
        }
        if let Some(user_id) = &self.user_id {
            params.push(("userId", user_id.clone()));
        }
        if let Some(from) = &self.from {
            params.push(("from", from.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        if let Some(to) = &self.to {
            params.push(("to", to.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        params
    }
}

/// Client for the collector's `/traces` endpoint
#[derive(Debug, Clone)]
pub struct TraceClient {
    client: Client,
    traces_url: String,
    max_retries: u32,
    retry_backoff: Duration,
    authenticated: bool,
}

impl TraceClient {
    /// Create a new trace client
    pub fn new(config: &ObservabilityConfig) -> ObservabilityResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout_duration())
            .default_headers(config.trace_headers()?)
            .build()
            .map_err(|e| {
                ObservabilityError::configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            traces_url: config.traces_url(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            authenticated: config.api_key.is_some(),
        })
    }

    /// URL traces are posted to
    pub fn traces_url(&self) -> &str {
        &self.traces_url
    }

    /// Whether requests carry an API key
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Submit a trace, retrying retryable failures with exponential backoff.
    /// Returns the collector's response body.
    pub async fn submit(&self, event: &TraceEvent) -> ObservabilityResult<Value> {
        let mut attempt = 0;
        loop {
            match self.submit_once(event).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    debug!(
                        trace_id = %event.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying trace submission"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Submit a trace once, without retries
    pub async fn submit_once(&self, event: &TraceEvent) -> ObservabilityResult<Value> {
        debug!(trace_id = %event.id, task = %event.task, "Submitting trace");

        let response = self
            .client
            .post(&self.traces_url)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                debug!("Failed to send trace {}: {}", event.id, e);
                ObservabilityError::Network { source: e }
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ObservabilityError::CollectorRejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(parse_body(&body))
    }

    /// List stored traces, newest first
    pub async fn list_traces(&self, query: &TraceQuery) -> ObservabilityResult<Vec<TraceEvent>> {
        let response = self
            .client
            .get(&self.traces_url)
            .query(&query.params())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ObservabilityError::CollectorRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
