//! Background trace dispatch
//!
//! Observed tools must never wait on the collector. The dispatcher owns a
//! bounded queue and a single tokio worker that drains it through a
//! [`TraceClient`]. Enqueueing is non-blocking; when the queue is full or the
//! dispatcher has been shut down the event is dropped and counted.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{ObservabilityError, ObservabilityResult, TraceClient, TraceEvent};

#[derive(Debug, Default)]
struct DispatchCounters {
    enqueued: AtomicU64,
    submitted: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Delivery counters of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Events accepted into the queue
    pub enqueued: u64,
    /// Events the collector acknowledged
    pub submitted: u64,
    /// Events that could not be delivered
    pub failed: u64,
    /// Events rejected before reaching the queue
    pub dropped: u64,
}

impl DispatchStats {
    /// Events still waiting in the queue or in flight
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.submitted)
            .saturating_sub(self.failed)
    }
}

/// Fire-and-forget trace delivery on a background task
#[derive(Debug)]
pub struct TraceDispatcher {
    sender: Mutex<Option<mpsc::Sender<TraceEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<DispatchCounters>,
}

impl TraceDispatcher {
    /// Start the worker on the current tokio runtime
    pub fn spawn(client: TraceClient, capacity: usize) -> ObservabilityResult<Self> {
        if capacity == 0 {
            return Err(ObservabilityError::configuration(
                "Queue capacity must be greater than 0",
            ));
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            ObservabilityError::runtime(format!("Trace dispatcher needs a tokio runtime: {e}"))
        })?;

        let (sender, receiver) = mpsc::channel(capacity);
        let counters = Arc::new(DispatchCounters::default());

        info!(
            traces_url = client.traces_url(),
            authenticated = client.is_authenticated(),
            capacity,
            "Starting trace dispatcher"
        );

        let worker = handle.spawn(run_worker(client, receiver, Arc::clone(&counters)));

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            counters,
        })
    }

    /// Queue an event for delivery without waiting
    pub fn dispatch(&self, event: TraceEvent) -> ObservabilityResult<()> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(sender) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(trace_id = %event.id, "Dispatcher shut down, dropping trace");
            return Err(ObservabilityError::DispatcherClosed);
        };

        match sender.try_send(event) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(trace_id = %event.id, task = %event.task, "Trace queue full, dropping trace");
                Err(ObservabilityError::QueueFull { trace_id: event.id })
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(trace_id = %event.id, "Trace worker stopped, dropping trace");
                Err(ObservabilityError::DispatcherClosed)
            }
        }
    }

    /// Current delivery counters
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Whether the dispatcher still accepts events
    pub fn is_running(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop accepting events, deliver everything already queued, and wait
    /// for the worker to exit. Calling it again is a no-op.
    pub async fn shutdown(&self) -> DispatchStats {
        // Dropping the last sender lets the worker drain and finish
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Trace worker terminated abnormally: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            submitted = stats.submitted,
            failed = stats.failed,
            dropped = stats.dropped,
            "Trace dispatcher stopped"
        );
        stats
    }
}

async fn run_worker(
    client: TraceClient,
    mut receiver: mpsc::Receiver<TraceEvent>,
    counters: Arc<DispatchCounters>,
) {
    while let Some(event) = receiver.recv().await {
        match client.submit(&event).await {
            Ok(_) => {
                counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(trace_id = %event.id, task = %event.task, "Trace delivered");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    trace_id = %event.id,
                    task = %event.task,
                    error = %e,
                    "Trace submission failed"
                );
            }
        }
    }
    debug!("Trace queue closed, worker exiting");
}
