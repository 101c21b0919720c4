//! Per-tool metrics aggregation
//!
//! The [`MetricsStore`] is the only shared mutable state in this crate. It is
//! created once, handed to every [`Observer`](crate::Observer) by `Arc`, and
//! lives for the rest of the process; there is deliberately no reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::trace::duration_ms;

/// Running statistics for one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetrics {
    /// Name of the observed tool
    pub name: String,
    /// Total invocations observed
    pub call_count: u64,
    /// Invocations that ended in an error
    pub error_count: u64,
    /// Sum of all call durations
    pub total_duration_ms: f64,
    /// Fastest call
    pub min_duration_ms: f64,
    /// Slowest call
    pub max_duration_ms: f64,
    /// Time of the most recent call
    pub last_called: Option<DateTime<Utc>>,
}

impl ToolMetrics {
    /// Empty statistics for a tool
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            call_count: 0,
            error_count: 0,
            total_duration_ms: 0.0,
            min_duration_ms: 0.0,
            max_duration_ms: 0.0,
            last_called: None,
        }
    }

    /// Fold one completed call into the statistics
    pub fn record(&mut self, duration_ms: f64, is_error: bool) {
        // NaN or negative durations would break min <= avg <= max
        let duration_ms = if duration_ms.is_finite() {
            duration_ms.max(0.0)
        } else {
            0.0
        };

        if self.call_count == 0 {
            self.min_duration_ms = duration_ms;
            self.max_duration_ms = duration_ms;
        } else {
            self.min_duration_ms = self.min_duration_ms.min(duration_ms);
            self.max_duration_ms = self.max_duration_ms.max(duration_ms);
        }

        self.call_count += 1;
        if is_error {
            self.error_count += 1;
        }
        self.total_duration_ms += duration_ms;
        self.last_called = Some(Utc::now());
    }

    /// Average call duration, zero before the first call
    pub fn avg_duration_ms(&self) -> f64 {
        if self.call_count > 0 {
            // Clamp against float rounding so avg never leaves [min, max]
            (self.total_duration_ms / self.call_count as f64)
                .clamp(self.min_duration_ms, self.max_duration_ms)
        } else {
            0.0
        }
    }

    /// Fraction of calls that failed
    pub fn error_rate(&self) -> f64 {
        if self.call_count > 0 {
            self.error_count as f64 / self.call_count as f64
        } else {
            0.0
        }
    }

    /// Immutable snapshot of the current values
    pub fn snapshot(&self) -> ToolMetricsSnapshot {
        ToolMetricsSnapshot {
            call_count: self.call_count,
            error_count: self.error_count,
            avg_duration_ms: self.avg_duration_ms(),
            min_duration_ms: self.min_duration_ms,
            max_duration_ms: self.max_duration_ms,
            total_duration_ms: self.total_duration_ms,
            error_rate: self.error_rate(),
        }
    }
}

/// Point-in-time view of a tool's statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetricsSnapshot {
    /// Total invocations observed
    pub call_count: u64,
    /// Invocations that ended in an error
    pub error_count: u64,
    /// Mean call duration
    pub avg_duration_ms: f64,
    /// Fastest call
    pub min_duration_ms: f64,
    /// Slowest call
    pub max_duration_ms: f64,
    /// Sum of all call durations
    pub total_duration_ms: f64,
    /// Fraction of calls that failed
    pub error_rate: f64,
}

/// Snapshot of every tool, ordered by name
pub type MetricsSnapshot = BTreeMap<String, ToolMetricsSnapshot>;

/// Process-wide store of per-tool statistics
#[derive(Debug, Default)]
pub struct MetricsStore {
    tools: RwLock<BTreeMap<String, ToolMetrics>>,
}

impl MetricsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed call. Creates the tool entry on first use and never fails.
    pub fn record(&self, tool_name: &str, duration: Duration, is_error: bool) {
        self.record_ms(tool_name, duration_ms(duration), is_error);
    }

    /// Record a completed call with a duration already in milliseconds
    pub fn record_ms(&self, tool_name: &str, duration_ms: f64, is_error: bool) {
        // A panic elsewhere while holding the lock must not disable metrics
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);

        match tools.get_mut(tool_name) {
            Some(metrics) => metrics.record(duration_ms, is_error),
            None => {
                let mut metrics = ToolMetrics::new(tool_name);
                metrics.record(duration_ms, is_error);
                tools.insert(tool_name.to_string(), metrics);
            }
        }
    }

    /// Snapshot of every tool observed so far
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools
            .iter()
            .map(|(name, metrics)| (name.clone(), metrics.snapshot()))
            .collect()
    }

    /// Snapshot of a single tool
    pub fn tool_metrics(&self, tool_name: &str) -> Option<ToolMetricsSnapshot> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.get(tool_name).map(ToolMetrics::snapshot)
    }

    /// Full statistics of a single tool, including its last call time
    pub fn tool_details(&self, tool_name: &str) -> Option<ToolMetrics> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.get(tool_name).cloned()
    }

    /// Names of every tool observed so far
    pub fn tool_names(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.keys().cloned().collect()
    }

    /// Whether no call has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Calls recorded across all tools
    pub fn total_calls(&self) -> u64 {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.values().map(|m| m.call_count).sum()
    }

    /// Human-readable table of the current snapshot
    pub fn render(&self) -> String {
        let snapshot = self.get_metrics();
        let mut out = String::new();

        let _ = writeln!(out, "MCP Tool Metrics");
        let _ = writeln!(out, "================");

        if snapshot.is_empty() {
            let _ = writeln!(out, "No tool calls recorded");
            return out;
        }

        for (name, metrics) in &snapshot {
            let _ = writeln!(out, "{name}");
            let _ = writeln!(out, "  calls:    {}", metrics.call_count);
            let _ = writeln!(
                out,
                "  errors:   {} ({:.1}%)",
                metrics.error_count,
                metrics.error_rate * 100.0
            );
            let _ = writeln!(
                out,
                "  duration: avg {:.2}ms, min {:.2}ms, max {:.2}ms",
                metrics.avg_duration_ms, metrics.min_duration_ms, metrics.max_duration_ms
            );
        }

        out
    }

    /// Write the rendered table to any writer (stderr for stdio servers)
    pub fn write_metrics<W: std::io::Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_all(self.render().as_bytes())
    }

    /// Print the rendered table to stdout
    pub fn print_metrics(&self) {
        print!("{}", self.render());
    }
}
