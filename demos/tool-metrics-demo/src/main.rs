//! Tool metrics demonstration
//!
//! Wraps three tools, calls them a few times (including failing calls), then
//! prints the per-tool metrics report and the raw snapshot as JSON.
//!
//! The collector is configured through the environment:
//!
//! ```text
//! MCP_OBSERVABILITY_API_URL=http://localhost:3001 \
//! MCP_OBSERVABILITY_API_KEY=mcp_... \
//! cargo run -p tool-metrics-demo
//! ```

use mcp_observability::{MetricsStore, ObservabilityConfig, Observer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn add_numbers((a, b): (i64, i64)) -> Result<i64, String> {
    std::thread::sleep(Duration::from_millis(10 + (a as u64 % 5) * 10));
    Ok(a + b)
}

fn divide_numbers((a, b): (i64, i64)) -> Result<f64, String> {
    std::thread::sleep(Duration::from_millis(15));
    if b == 0 {
        return Err("Division by zero!".to_string());
    }
    Ok(a as f64 / b as f64)
}

async fn slow_computation(n: u64) -> Result<u64, String> {
    sleep(Duration::from_millis(100 + n * 10)).await;
    Ok((0..n).sum())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so the report on stdout stays clean
    let default_filter = "tool_metrics_demo=info,mcp_observability=info";
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ObservabilityConfig::from_env()?;
    info!(traces_url = %config.traces_url(), "Starting tool metrics demo");

    let metrics = Arc::new(MetricsStore::new());
    let observer = Observer::from_config(&config, metrics.clone())?;

    let add = observer.wrap("add_function", add_numbers)?;
    let divide = observer.wrap("divide_function", divide_numbers)?;
    let slow = observer.wrap_async("slow_function", slow_computation)?;

    println!("Running observability demo...");

    for i in 0..10 {
        match add.call((i, i + 1)) {
            Ok(sum) => println!("add_numbers({i}, {}) = {sum}", i + 1),
            Err(e) => println!("add_numbers({i}, {}) failed: {e}", i + 1),
        }
    }

    for divisor in [1, 2, 0, 3, 0, 4, 5] {
        match divide.call((10, divisor)) {
            Ok(quotient) => println!("divide_numbers(10, {divisor}) = {quotient}"),
            Err(e) => println!("divide_numbers(10, {divisor}) failed: {e}"),
        }
    }

    for n in [5, 10, 15] {
        let total = slow.call(n).await.map_err(anyhow::Error::msg)?;
        println!("slow_computation({n}) = {total}");
    }

    println!("\n{}", "=".repeat(50));
    metrics.print_metrics();

    println!("\n{}", "=".repeat(50));
    println!("Raw metrics data:");
    println!("{}", serde_json::to_string_pretty(&metrics.get_metrics())?);

    if let Some(stats) = observer.shutdown().await {
        info!(
            submitted = stats.submitted,
            failed = stats.failed,
            dropped = stats.dropped,
            "Trace delivery finished"
        );
    }

    Ok(())
}
