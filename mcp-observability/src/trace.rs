//! Trace event model
//!
//! A [`TraceEvent`] describes a single tool invocation and serializes to the
//! body accepted by the collector's `POST /traces` endpoint.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};
use std::time::Duration;
use uuid::Uuid;

/// Metadata key: name of the observed tool
pub const META_TOOL_NAME: &str = "tool_name";
/// Metadata key: wall time of the call in milliseconds
pub const META_DURATION_MS: &str = "duration_ms";
/// Metadata key: call outcome (see [`CallStatus`])
pub const META_STATUS: &str = "status";
/// Metadata key: Rust type name of the error returned by the tool
pub const META_ERROR_TYPE: &str = "error_type";

/// Outcome of an observed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// The tool returned `Ok`
    Success,
    /// The tool returned `Err`
    Error,
    /// The tool panicked
    Panicked,
}

impl CallStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Panicked => "panicked",
        }
    }

    /// Whether the status counts towards a tool's error count
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Success)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trace event submitted to the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Unique trace identifier
    pub id: Uuid,

    /// Submission time
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Logical operation name
    pub task: String,

    /// Input arguments or call context
    #[serde(default)]
    pub context: Value,

    /// Result value or error description
    #[serde(default)]
    pub model_output: Value,

    /// Free-form auxiliary data. Collectors echo `null` for traces posted
    /// without metadata; that reads back as an empty map.
    #[serde(default, deserialize_with = "deserialize_metadata")]
    pub metadata: Map<String, Value>,
}

impl TraceEvent {
    /// Create a trace event with a fresh id and the current time
    pub fn new<S: Into<String>>(task: S, context: Value, model_output: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            task: task.into(),
            context: normalize_context(context),
            model_output,
            metadata: Map::new(),
        }
    }

    /// Build the trace for one observed tool call
    pub fn tool_call(
        tool_name: &str,
        context: Value,
        output: Value,
        status: CallStatus,
        duration: Duration,
    ) -> Self {
        Self::new(tool_name, context, output)
            .with_metadata(META_TOOL_NAME, tool_name)
            .with_metadata(META_DURATION_MS, duration_ms(duration))
            .with_metadata(META_STATUS, status.as_str())
    }

    /// Add a metadata entry
    pub fn with_metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a metadata map, overwriting existing keys
    pub fn with_metadata_map(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Status recorded in the metadata, if any
    pub fn status(&self) -> Option<&str> {
        self.metadata.get(META_STATUS).and_then(Value::as_str)
    }
}

/// Wrap non-object contexts so the collector always receives a JSON object
pub fn normalize_context(context: Value) -> Value {
    match context {
        Value::Object(_) => context,
        Value::Null => Value::Object(Map::new()),
        other => json!({ "args": other }),
    }
}

/// Error description used as `model_output` for failed calls
pub fn error_output(message: &str) -> Value {
    json!({ "error": message })
}

/// Milliseconds as a float with sub-millisecond precision
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

fn serialize_timestamp<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn deserialize_metadata<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}
