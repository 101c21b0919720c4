//! Tool-call observability for MCP servers
//!
//! This crate wraps the functions an MCP server exposes as tools and provides:
//! - Per-call timing and success/error classification
//! - Process-wide per-tool metrics (call count, error count, avg/min/max latency)
//! - Best-effort trace forwarding to a remote collector (`POST {api_url}/traces`)
//! - Redaction of credentials from trace context before it leaves the process
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mcp_observability::{MetricsStore, ObservabilityConfig, Observer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // One store for the whole process, shared by every observer
//!     let metrics = Arc::new(MetricsStore::new());
//!
//!     let config = ObservabilityConfig::new("http://localhost:3001")
//!         .with_api_key("mcp_your_api_key_here");
//!     let observer = Observer::from_config(&config, metrics.clone())?;
//!
//!     let divide = observer.wrap("divide_numbers", |(a, b): (i64, i64)| {
//!         a.checked_div(b).ok_or("division by zero")
//!     })?;
//!
//!     assert_eq!(divide.call((10, 2)), Ok(5));
//!     assert!(divide.call((10, 0)).is_err());
//!
//!     metrics.print_metrics();
//!     observer.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Guarantees
//!
//! - Wrapped tools return exactly what the unwrapped tool returns.
//! - Collector failures are logged and counted, never raised to the tool's caller.
//! - Trace submission runs on a background task; a slow collector adds no
//!   latency to tool calls.
//! - A panicking tool is recorded as an error while the panic unwinds. Builds
//!   with `panic = "abort"` terminate before that happens, so such calls are
//!   not recorded.
//!
//! # Non-serializable tools
//!
//! `wrap` summarizes arguments and results with serde. Tools whose types do
//! not implement `Serialize` use `wrap_with` and describe them with closures:
//!
//! ```rust,ignore
//! let query = observer.wrap_with(
//!     "run_query",
//!     |conn: Connection| conn.query("SELECT 1"),
//!     |conn: &Connection| json!({ "database": conn.database() }),
//!     |rows: &Rows| json!({ "rows": rows.len() }),
//! )?;
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod observer;
pub mod sanitize;
pub mod trace;

pub use client::{TraceClient, TraceQuery};
pub use config::{AuthScheme, MissingKeyPolicy, ObservabilityConfig};
pub use dispatcher::{DispatchStats, TraceDispatcher};
pub use error::{ObservabilityError, ObservabilityResult};
pub use metrics::{MetricsSnapshot, MetricsStore, ToolMetrics, ToolMetricsSnapshot};
pub use observer::{JsonSummary, ObservedAsyncTool, ObservedTool, Observer, Summarize, SummaryFn};
pub use sanitize::{ContextSanitizer, SanitizationConfig};
pub use trace::{CallStatus, TraceEvent};

/// Default observability configuration
pub fn default_config() -> ObservabilityConfig {
    ObservabilityConfig::default()
}
