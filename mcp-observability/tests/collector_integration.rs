//! End-to-end tests against an in-process trace collector

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use mcp_observability::{
    AuthScheme, MetricsStore, ObservabilityConfig, Observer, TraceClient, TraceQuery,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// Collector that records every request and can be told to fail
#[derive(Clone, Default)]
struct MockCollector {
    traces: Arc<Mutex<Vec<Value>>>,
    headers: Arc<Mutex<Vec<HashMap<String, String>>>>,
    requests: Arc<AtomicUsize>,
    fail_next: Arc<AtomicUsize>,
    reject_status: Option<StatusCode>,
}

impl MockCollector {
    fn failing(times: usize) -> Self {
        let collector = Self::default();
        collector.fail_next.store(times, Ordering::SeqCst);
        collector
    }

    fn rejecting(status: StatusCode) -> Self {
        Self {
            reject_status: Some(status),
            ..Self::default()
        }
    }

    fn traces(&self) -> Vec<Value> {
        self.traces.lock().unwrap().clone()
    }

    fn headers(&self) -> Vec<HashMap<String, String>> {
        self.headers.lock().unwrap().clone()
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn store_trace(
    State(collector): State<MockCollector>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    collector.requests.fetch_add(1, Ordering::SeqCst);

    if let Some(status) = collector.reject_status {
        return (status, Json(json!({ "error": "rejected" })));
    }

    let remaining = collector.fail_next.load(Ordering::SeqCst);
    if remaining > 0 {
        collector.fail_next.store(remaining - 1, Ordering::SeqCst);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "database unavailable" })),
        );
    }

    let captured = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    collector.headers.lock().unwrap().push(captured);

    let id = body["id"].clone();
    collector.traces.lock().unwrap().push(body);
    (StatusCode::CREATED, Json(json!({ "id": id })))
}

async fn list_traces(
    State(collector): State<MockCollector>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let mut traces: Vec<Value> = collector
        .traces()
        .into_iter()
        .filter(|trace| {
            let field_matches = |param: &str, field: &str| {
                params
                    .get(param)
                    .is_none_or(|wanted| trace[field].as_str() == Some(wanted.as_str()))
            };
            field_matches("task", "task") && field_matches("userId", "userId")
        })
        .collect();

    // RFC 3339 UTC timestamps with fixed precision sort lexicographically
    traces.sort_by(|a, b| {
        b["timestamp"]
            .as_str()
            .unwrap_or_default()
            .cmp(a["timestamp"].as_str().unwrap_or_default())
    });
    traces.truncate(100);
    Json(traces)
}

async fn start_collector(collector: MockCollector) -> String {
    let app = Router::new()
        .route("/traces", post(store_trace).get(list_traces))
        .with_state(collector);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn test_config(api_url: &str) -> ObservabilityConfig {
    ObservabilityConfig {
        retry_backoff_ms: 10,
        ..ObservabilityConfig::new(api_url)
    }
}

#[tokio::test]
async fn test_traces_posted_without_api_key() -> anyhow::Result<()> {
    let collector = MockCollector::default();
    let url = start_collector(collector.clone()).await;

    let metrics = Arc::new(MetricsStore::new());
    let observer = Observer::from_config(&test_config(&url), metrics.clone())?;
    let add = observer.wrap("add_function", |(a, b): (i64, i64)| Ok::<_, String>(a + b))?;

    assert_eq!(add.call((3, 4)), Ok(7));

    let stats = observer.shutdown().await.unwrap();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.failed, 0);

    let traces = collector.traces();
    assert_eq!(traces.len(), 1);
    let trace = &traces[0];
    assert_eq!(trace["task"], "add_function");
    assert_eq!(trace["context"], json!({ "args": [3, 4] }));
    assert_eq!(trace["model_output"], 7);
    assert_eq!(trace["metadata"]["status"], "success");
    assert_eq!(trace["metadata"]["tool_name"], "add_function");
    assert!(trace["metadata"]["duration_ms"].as_f64().unwrap() >= 0.0);
    assert!(trace["timestamp"].as_str().unwrap().ends_with('Z'));

    let headers = &collector.headers()[0];
    assert!(!headers.contains_key("x-api-key"));
    assert!(!headers.contains_key("authorization"));
    assert_eq!(
        headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    Ok(())
}

#[tokio::test]
async fn test_api_key_sent_on_every_trace() -> anyhow::Result<()> {
    let collector = MockCollector::default();
    let url = start_collector(collector.clone()).await;

    let config = test_config(&url).with_api_key("mcp_test_key");
    let observer = Observer::from_config(&config, Arc::new(MetricsStore::new()))?;
    let add = observer.wrap("add_function", |(a, b): (i64, i64)| Ok::<_, String>(a + b))?;

    add.call((1, 2)).unwrap();
    add.call((5, 6)).unwrap();
    observer.shutdown().await;

    let headers = collector.headers();
    assert_eq!(headers.len(), 2);
    for request in headers {
        assert_eq!(
            request.get("x-api-key").map(String::as_str),
            Some("mcp_test_key")
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_bearer_scheme() -> anyhow::Result<()> {
    let collector = MockCollector::default();
    let url = start_collector(collector.clone()).await;

    let config = test_config(&url)
        .with_api_key("mcp_test_key")
        .with_auth_scheme(AuthScheme::Bearer);
    let observer = Observer::from_config(&config, Arc::new(MetricsStore::new()))?;
    let echo = observer.wrap("echo", |s: String| Ok::<_, String>(s))?;

    echo.call("hello".to_string()).unwrap();
    observer.shutdown().await;

    let headers = &collector.headers()[0];
    assert_eq!(
        headers.get("authorization").map(String::as_str),
        Some("Bearer mcp_test_key")
    );
    assert!(!headers.contains_key("x-api-key"));
    Ok(())
}

#[tokio::test]
async fn test_error_trace_carries_message() -> anyhow::Result<()> {
    let collector = MockCollector::default();
    let url = start_collector(collector.clone()).await;

    let metrics = Arc::new(MetricsStore::new());
    let observer = Observer::from_config(&test_config(&url), metrics.clone())?;
    let divide = observer.wrap("divide_function", |(a, b): (i64, i64)| {
        a.checked_div(b).ok_or_else(|| "Cannot divide by zero".to_string())
    })?;

    assert_eq!(
        divide.call((10, 0)),
        Err("Cannot divide by zero".to_string())
    );
    observer.shutdown().await;

    let trace = &collector.traces()[0];
    assert_eq!(
        trace["model_output"],
        json!({ "error": "Cannot divide by zero" })
    );
    assert_eq!(trace["metadata"]["status"], "error");
    assert!(trace["metadata"]["error_type"].is_string());
    assert_eq!(metrics.get_metrics()["divide_function"].error_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_collector_error_does_not_change_result() -> anyhow::Result<()> {
    let collector = MockCollector::rejecting(StatusCode::UNAUTHORIZED);
    let url = start_collector(collector.clone()).await;

    let metrics = Arc::new(MetricsStore::new());
    let observer = Observer::from_config(&test_config(&url), metrics.clone())?;
    let add = observer.wrap("add_function", |(a, b): (i64, i64)| Ok::<_, String>(a + b))?;

    assert_eq!(add.call((2, 2)), Ok(4));

    let stats = observer.shutdown().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.submitted, 0);
    // Client errors are not retried
    assert_eq!(collector.requests(), 1);

    let snapshot = metrics.get_metrics();
    assert_eq!(snapshot["add_function"].call_count, 1);
    assert_eq!(snapshot["add_function"].error_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_server_errors_retried() -> anyhow::Result<()> {
    let collector = MockCollector::failing(2);
    let url = start_collector(collector.clone()).await;

    let observer = Observer::from_config(&test_config(&url), Arc::new(MetricsStore::new()))?;
    let add = observer.wrap("add_function", |(a, b): (i64, i64)| Ok::<_, String>(a + b))?;

    add.call((1, 1)).unwrap();

    let stats = observer.shutdown().await.unwrap();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(collector.requests(), 3);
    assert_eq!(collector.traces().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_retries_exhausted() -> anyhow::Result<()> {
    let collector = MockCollector::failing(10);
    let url = start_collector(collector.clone()).await;

    let config = ObservabilityConfig {
        max_retries: 1,
        ..test_config(&url)
    };
    let observer = Observer::from_config(&config, Arc::new(MetricsStore::new()))?;
    let add = observer.wrap("add_function", |(a, b): (i64, i64)| Ok::<_, String>(a + b))?;

    assert_eq!(add.call((1, 1)), Ok(2));

    let stats = observer.shutdown().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(collector.requests(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_collector() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let config = ObservabilityConfig {
        max_retries: 0,
        ..test_config(&format!("http://127.0.0.1:{port}"))
    };
    let metrics = Arc::new(MetricsStore::new());
    let observer = Observer::from_config(&config, metrics.clone())?;
    let add = observer.wrap("add_function", |(a, b): (i64, i64)| Ok::<_, String>(a + b))?;

    assert_eq!(add.call((20, 22)), Ok(42));

    let stats = observer.shutdown().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(metrics.get_metrics()["add_function"].call_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_sensitive_context_redacted() -> anyhow::Result<()> {
    let collector = MockCollector::default();
    let url = start_collector(collector.clone()).await;

    let observer = Observer::from_config(&test_config(&url), Arc::new(MetricsStore::new()))?;
    let lookup = observer.wrap("lookup", |args: Value| Ok::<_, String>(args["city"].clone()))?;

    lookup
        .call(json!({ "city": "Berlin", "api_key": "sk-live-123" }))
        .unwrap();
    observer.shutdown().await;

    let trace = &collector.traces()[0];
    assert_eq!(trace["context"]["city"], "Berlin");
    assert_eq!(trace["context"]["api_key"], "[REDACTED]");
    assert_eq!(trace["model_output"], "Berlin");
    Ok(())
}

/// Connection-like value without a `Serialize` impl
#[derive(Debug, PartialEq)]
struct Session {
    id: u32,
    secret: String,
}

#[tokio::test]
async fn test_custom_summaries_sent() -> anyhow::Result<()> {
    let collector = MockCollector::default();
    let url = start_collector(collector.clone()).await;

    let observer = Observer::from_config(&test_config(&url), Arc::new(MetricsStore::new()))?;
    let resume = observer.wrap_with(
        "resume_session",
        |session: Session| Ok::<_, String>(Session { id: session.id + 1, ..session }),
        |session: &Session| json!({ "session_id": session.id }),
        |session: &Session| json!({ "resumed": session.id }),
    )?;

    let resumed = resume.call(Session {
        id: 1,
        secret: "hunter2".to_string(),
    });
    assert_eq!(resumed.map(|s| s.id), Ok(2));
    observer.shutdown().await;

    let trace = &collector.traces()[0];
    assert_eq!(trace["context"], json!({ "session_id": 1 }));
    assert_eq!(trace["model_output"], json!({ "resumed": 2 }));
    assert!(!trace.to_string().contains("hunter2"));
    Ok(())
}

#[tokio::test]
async fn test_list_traces() -> anyhow::Result<()> {
    let collector = MockCollector::default();
    let url = start_collector(collector.clone()).await;
    let config = test_config(&url);

    let observer = Observer::from_config(&config, Arc::new(MetricsStore::new()))?;
    let add = observer.wrap("add_function", |(a, b): (i64, i64)| Ok::<_, String>(a + b))?;
    let echo = observer.wrap("echo", |s: String| Ok::<_, String>(s))?;

    add.call((1, 2)).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    add.call((3, 4)).unwrap();
    echo.call("hi".to_string()).unwrap();
    observer.shutdown().await;

    // Older records may come back with null metadata and an owner
    collector.traces.lock().unwrap().push(json!({
        "id": "4f7c1f4e-7a4b-4a43-9d55-3f1f6c1c2a10",
        "timestamp": "2020-01-01T00:00:00.000Z",
        "task": "legacy",
        "context": {},
        "model_output": "ok",
        "metadata": null,
        "userId": "user-42"
    }));

    let client = TraceClient::new(&config)?;
    let all = client.list_traces(&TraceQuery::default()).await?;
    assert_eq!(all.len(), 4);
    assert_eq!(all[3].task, "legacy");
    assert!(all[3].metadata.is_empty());

    let owned = client
        .list_traces(&TraceQuery {
            user_id: Some("user-42".to_string()),
            ..Default::default()
        })
        .await?;
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].task, "legacy");

    let adds = client
        .list_traces(&TraceQuery {
            task: Some("add_function".to_string()),
            ..Default::default()
        })
        .await?;
    assert_eq!(adds.len(), 2);
    assert!(adds[0].timestamp >= adds[1].timestamp);
    assert_eq!(adds[0].model_output, json!(7));
    Ok(())
}

#[tokio::test]
async fn test_direct_submit_returns_collector_body() -> anyhow::Result<()> {
    let collector = MockCollector::default();
    let url = start_collector(collector.clone()).await;

    let client = TraceClient::new(&test_config(&url))?;
    let event = mcp_observability::TraceEvent::new(
        "Summarize",
        json!({ "userMessage": "Summarize the last 5 emails" }),
        json!("Here is the summary..."),
    );

    let body = client.submit(&event).await?;
    assert_eq!(body["id"], event.id.to_string());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_counted() -> anyhow::Result<()> {
    let collector = MockCollector::default();
    let url = start_collector(collector.clone()).await;

    let metrics = Arc::new(MetricsStore::new());
    let observer = Observer::from_config(&test_config(&url), metrics.clone())?;
    let slow = Arc::new(observer.wrap_async("slow_function", |n: u64| async move {
        tokio::time::sleep(Duration::from_millis(1)).await;
        if n % 5 == 0 {
            Err(format!("rejected {n}"))
        } else {
            Ok(n)
        }
    })?);

    let tasks: Vec<_> = (0..8u64)
        .map(|task| {
            let slow = Arc::clone(&slow);
            tokio::spawn(async move {
                for i in 0..25u64 {
                    let _ = slow.call(task * 25 + i).await;
                }
            })
        })
        .collect();

    for task in tasks {
        task.await?;
    }

    let snapshot = metrics.get_metrics();
    assert_eq!(snapshot["slow_function"].call_count, 200);
    assert_eq!(snapshot["slow_function"].error_count, 40);

    let stats = observer.shutdown().await.unwrap();
    assert_eq!(stats.enqueued + stats.dropped, 200);
    assert_eq!(stats.submitted, stats.enqueued);
    assert_eq!(collector.traces().len() as u64, stats.submitted);
    Ok(())
}
