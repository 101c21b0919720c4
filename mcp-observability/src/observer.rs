//! Tool call observation
//!
//! [`Observer::wrap`] and [`Observer::wrap_async`] turn a tool function into an
//! observed tool with the same input and output contract. Every call is timed,
//! classified as success or error, folded into the shared [`MetricsStore`], and
//! (when a dispatcher is configured) described by a [`TraceEvent`] queued for
//! the collector. The tool's own `Result` is always returned untouched.
//!
//! Arguments and results are turned into trace JSON by a [`Summarize`]
//! implementation stored on the wrapped tool. `wrap` uses [`JsonSummary`]
//! (serde); `wrap_with` accepts closures, so tools whose types do not
//! implement `Serialize` can be observed too. Summaries are only computed
//! when traces are being submitted.

use serde::Serialize;
use serde_json::{Map, Value, json};
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::trace::{CallStatus, META_ERROR_TYPE, duration_ms, error_output};
use crate::{
    ContextSanitizer, DispatchStats, MetricsStore, ObservabilityConfig, ObservabilityError,
    ObservabilityResult, TraceClient, TraceDispatcher, TraceEvent,
};

/// Turns a tool's arguments or output into the JSON recorded in its trace
pub trait Summarize<V: ?Sized> {
    /// JSON form of `value`
    fn summarize(&self, value: &V) -> Value;
}

/// Summarizes values through their `Serialize` impl
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSummary;

impl<V: Serialize + ?Sized> Summarize<V> for JsonSummary {
    fn summarize(&self, value: &V) -> Value {
        serde_json::to_value(value).unwrap_or_else(|e| {
            debug!(error = %e, "Value is not serializable");
            json!({ "unserializable": e.to_string() })
        })
    }
}

/// Summarizes values with a closure
#[derive(Clone, Copy)]
pub struct SummaryFn<C>(pub C);

impl<C> fmt::Debug for SummaryFn<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SummaryFn")
    }
}

impl<V: ?Sized, C: Fn(&V) -> Value> Summarize<V> for SummaryFn<C> {
    fn summarize(&self, value: &V) -> Value {
        (self.0)(value)
    }
}

/// Wraps tools with timing, metrics, and trace submission
#[derive(Debug, Clone)]
pub struct Observer {
    metrics: Arc<MetricsStore>,
    dispatcher: Option<Arc<TraceDispatcher>>,
    sanitizer: Option<Arc<ContextSanitizer>>,
}

impl Observer {
    /// Observer that records metrics only
    pub fn new(metrics: Arc<MetricsStore>) -> Self {
        Self {
            metrics,
            dispatcher: None,
            sanitizer: None,
        }
    }

    /// Observer that records metrics and, when the configuration allows it,
    /// submits traces through a background dispatcher.
    ///
    /// Must be called inside a tokio runtime when submission is enabled.
    pub fn from_config(
        config: &ObservabilityConfig,
        metrics: Arc<MetricsStore>,
    ) -> ObservabilityResult<Self> {
        config.validate()?;

        let mut observer = Self::new(metrics);

        if config.sanitize_context {
            observer.sanitizer = Some(Arc::new(ContextSanitizer::new()));
        }

        if config.submission_enabled() {
            let client = TraceClient::new(config)?;
            let dispatcher = TraceDispatcher::spawn(client, config.queue_capacity)?;
            observer.dispatcher = Some(Arc::new(dispatcher));
        } else {
            info!("Trace submission disabled, recording metrics only");
        }

        Ok(observer)
    }

    /// Use an existing dispatcher for trace submission
    pub fn with_dispatcher(mut self, dispatcher: Arc<TraceDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Sanitize trace contexts before submission
    pub fn with_sanitizer(mut self, sanitizer: ContextSanitizer) -> Self {
        self.sanitizer = Some(Arc::new(sanitizer));
        self
    }

    /// Shared metrics store
    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    /// Trace dispatcher, if submission is enabled
    pub fn dispatcher(&self) -> Option<&Arc<TraceDispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Whether traces are being submitted
    pub fn is_submitting(&self) -> bool {
        self.dispatcher.as_ref().is_some_and(|d| d.is_running())
    }

    /// Wrap a synchronous tool, summarizing arguments and output with serde
    pub fn wrap<N, F>(&self, tool_name: N, tool: F) -> ObservabilityResult<ObservedTool<F>>
    where
        N: Into<String>,
    {
        Ok(ObservedTool {
            name: checked_name(tool_name, "tool")?,
            tool,
            observer: self.clone(),
            summarize_args: JsonSummary,
            summarize_output: JsonSummary,
        })
    }

    /// Wrap a synchronous tool with custom argument and output summaries
    pub fn wrap_with<N, F, A, T, E, C, O>(
        &self,
        tool_name: N,
        tool: F,
        summarize_args: C,
        summarize_output: O,
    ) -> ObservabilityResult<ObservedTool<F, SummaryFn<C>, SummaryFn<O>>>
    where
        N: Into<String>,
        F: Fn(A) -> Result<T, E>,
        C: Fn(&A) -> Value,
        O: Fn(&T) -> Value,
    {
        Ok(ObservedTool {
            name: checked_name(tool_name, "tool")?,
            tool,
            observer: self.clone(),
            summarize_args: SummaryFn(summarize_args),
            summarize_output: SummaryFn(summarize_output),
        })
    }

    /// Wrap an asynchronous tool, summarizing arguments and output with serde
    pub fn wrap_async<N, F>(
        &self,
        tool_name: N,
        tool: F,
    ) -> ObservabilityResult<ObservedAsyncTool<F>>
    where
        N: Into<String>,
    {
        Ok(ObservedAsyncTool {
            name: checked_name(tool_name, "async tool")?,
            tool,
            observer: self.clone(),
            summarize_args: JsonSummary,
            summarize_output: JsonSummary,
        })
    }

    /// Wrap an asynchronous tool with custom argument and output summaries
    pub fn wrap_async_with<N, F, A, Fut, T, E, C, O>(
        &self,
        tool_name: N,
        tool: F,
        summarize_args: C,
        summarize_output: O,
    ) -> ObservabilityResult<ObservedAsyncTool<F, SummaryFn<C>, SummaryFn<O>>>
    where
        N: Into<String>,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&A) -> Value,
        O: Fn(&T) -> Value,
    {
        Ok(ObservedAsyncTool {
            name: checked_name(tool_name, "async tool")?,
            tool,
            observer: self.clone(),
            summarize_args: SummaryFn(summarize_args),
            summarize_output: SummaryFn(summarize_output),
        })
    }

    /// Submit a free-form trace. Returns the trace id when it was queued.
    pub fn trace<S: Into<String>>(
        &self,
        task: S,
        context: Value,
        output: Value,
        metadata: Map<String, Value>,
    ) -> Option<Uuid> {
        let dispatcher = self.dispatcher.as_ref()?;
        let event = TraceEvent::new(task, self.sanitize(context), output)
            .with_metadata_map(metadata);
        let id = event.id;
        dispatcher.dispatch(event).ok().map(|()| id)
    }

    /// Deliver queued traces and stop the dispatcher
    pub async fn shutdown(&self) -> Option<DispatchStats> {
        match &self.dispatcher {
            Some(dispatcher) => Some(dispatcher.shutdown().await),
            None => None,
        }
    }

    fn begin<'a>(&'a self, tool_name: &'a str, context: impl FnOnce() -> Value) -> CallGuard<'a> {
        // Context is only needed for traces
        let context = if self.dispatcher.is_some() {
            context()
        } else {
            Value::Null
        };

        CallGuard {
            observer: self,
            tool_name,
            context: Some(context),
            start: Instant::now(),
        }
    }

    fn complete<T, E: Display>(
        &self,
        tool_name: &str,
        context: Value,
        result: &Result<T, E>,
        output: impl FnOnce(&T) -> Value,
        elapsed: Duration,
    ) {
        match result {
            Ok(value) => {
                let output = if self.dispatcher.is_some() {
                    output(value)
                } else {
                    Value::Null
                };
                self.record_outcome(tool_name, context, CallStatus::Success, output, None, elapsed);
            }
            Err(e) => {
                let message = e.to_string();
                self.record_outcome(
                    tool_name,
                    context,
                    CallStatus::Error,
                    error_output(&message),
                    Some(std::any::type_name::<E>()),
                    elapsed,
                );
            }
        }
    }

    fn record_outcome(
        &self,
        tool_name: &str,
        context: Value,
        status: CallStatus,
        output: Value,
        error_type: Option<&str>,
        elapsed: Duration,
    ) {
        self.metrics.record(tool_name, elapsed, status.is_error());

        let duration_ms = duration_ms(elapsed);
        match status {
            CallStatus::Success => debug!(tool_name, duration_ms, "Tool call succeeded"),
            CallStatus::Error => {
                info!(tool_name, duration_ms, error = %output["error"], "Tool call failed")
            }
            CallStatus::Panicked => error!(tool_name, duration_ms, "Tool call panicked"),
        }

        let Some(dispatcher) = &self.dispatcher else {
            return;
        };

        let mut event =
            TraceEvent::tool_call(tool_name, self.sanitize(context), output, status, elapsed);
        if let Some(error_type) = error_type {
            event = event.with_metadata(META_ERROR_TYPE, error_type);
        }

        // Delivery problems are logged by the dispatcher and never reach the caller
        let _ = dispatcher.dispatch(event);
    }

    fn sanitize(&self, context: Value) -> Value {
        match &self.sanitizer {
            Some(sanitizer) => sanitizer.sanitize_value(&context),
            None => context,
        }
    }
}

/// Records the outcome of one call. A guard dropped without `finish` means the
/// tool panicked (recorded as an error) or its future was cancelled (not recorded).
struct CallGuard<'a> {
    observer: &'a Observer,
    tool_name: &'a str,
    context: Option<Value>,
    start: Instant,
}

impl CallGuard<'_> {
    fn finish<T, E: Display>(mut self, result: &Result<T, E>, output: impl FnOnce(&T) -> Value) {
        let elapsed = self.start.elapsed();
        let context = self.context.take().unwrap_or(Value::Null);
        self.observer.complete(self.tool_name, context, result, output, elapsed);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };

        if std::thread::panicking() {
            self.observer.record_outcome(
                self.tool_name,
                context,
                CallStatus::Panicked,
                error_output("tool panicked"),
                None,
                self.start.elapsed(),
            );
        } else {
            debug!(tool_name = self.tool_name, "Tool call cancelled before completion");
        }
    }
}

/// A synchronous tool wrapped by an [`Observer`]
#[derive(Debug, Clone)]
pub struct ObservedTool<F, C = JsonSummary, O = JsonSummary> {
    name: String,
    tool: F,
    observer: Observer,
    summarize_args: C,
    summarize_output: O,
}

impl<F, C, O> ObservedTool<F, C, O> {
    /// Name the tool is recorded under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observer recording this tool
    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    /// Unwrap the original tool
    pub fn into_inner(self) -> F {
        self.tool
    }

    /// Invoke the tool. The result, including any error, is returned unchanged.
    pub fn call<A, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        C: Summarize<A>,
        O: Summarize<T>,
        E: Display,
    {
        let guard = self
            .observer
            .begin(&self.name, || self.summarize_args.summarize(&args));
        let result = (self.tool)(args);
        guard.finish(&result, |value| self.summarize_output.summarize(value));
        result
    }
}

/// An asynchronous tool wrapped by an [`Observer`]
#[derive(Debug, Clone)]
pub struct ObservedAsyncTool<F, C = JsonSummary, O = JsonSummary> {
    name: String,
    tool: F,
    observer: Observer,
    summarize_args: C,
    summarize_output: O,
}

impl<F, C, O> ObservedAsyncTool<F, C, O> {
    /// Name the tool is recorded under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observer recording this tool
    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    /// Unwrap the original tool
    pub fn into_inner(self) -> F {
        self.tool
    }

    /// Invoke the tool. The result, including any error, is returned unchanged.
    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Summarize<A>,
        O: Summarize<T>,
        E: Display,
    {
        let guard = self
            .observer
            .begin(&self.name, || self.summarize_args.summarize(&args));
        let result = (self.tool)(args).await;
        guard.finish(&result, |value| self.summarize_output.summarize(value));
        result
    }
}

fn checked_name<N: Into<String>>(tool_name: N, kind: &str) -> ObservabilityResult<String> {
    let name = tool_name.into();
    validate_tool_name(&name)?;
    debug!(tool_name = %name, kind, "Observing tool");
    Ok(name)
}

fn validate_tool_name(name: &str) -> ObservabilityResult<()> {
    if name.trim().is_empty() {
        return Err(ObservabilityError::invalid_tool_name(
            name,
            "tool name must not be empty",
        ));
    }

    if name.chars().any(char::is_control) {
        return Err(ObservabilityError::invalid_tool_name(
            name,
            "tool name must not contain control characters",
        ));
    }

    Ok(())
}
