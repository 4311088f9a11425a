//! Feeds timer events from the scheduler into entity processing.
//!
//! The scheduler only scans; running the transitions happens here so a slow
//! hook never delays the next scan. Each event runs on the blocking pool
//! because hooks and store writes are synchronous.

use crate::error::TimerError;
use crate::scheduler::TimerDispatch;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex, Notify};
use wfsm_core::{CoreError, Workflow};

/// Consumes [`TimerDispatch`] pairs in order and submits each event to its
/// entity.
pub struct TimedEventDispatcher {
    workflow: Workflow,
    receiver: Mutex<mpsc::UnboundedReceiver<TimerDispatch>>,
    dispatched: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    shutdown: AtomicBool,
    notify: Notify,
}

impl TimedEventDispatcher {
    pub fn new(workflow: Workflow, receiver: mpsc::UnboundedReceiver<TimerDispatch>) -> Self {
        Self {
            workflow,
            receiver: Mutex::new(receiver),
            dispatched: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Runs the dispatch loop (call from a background task). Returns when shut
    /// down or when every sender is gone.
    pub async fn run(&self) {
        tracing::info!("Timed event dispatcher started for {}", self.workflow.kind());

        let mut receiver = self.receiver.lock().await;
        while !self.shutdown.load(Ordering::Relaxed) {
            tokio::select! {
                _ = self.notify.notified() => {}
                next = receiver.recv() => match next {
                    Some(item) => self.dispatch(item).await,
                    None => break,
                },
            }
        }

        tracing::info!("Timed event dispatcher stopped for {}", self.workflow.kind());
    }

    /// Submits one timer event to its entity and waits for processing to
    /// finish. Failures are reported, never returned.
    pub async fn dispatch(&self, item: TimerDispatch) {
        let TimerDispatch { entity, event } = item;

        let handle = match self.workflow.resolve(&entity) {
            Ok(handle) => handle,
            Err(CoreError::EntityNotFound { .. }) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(entity_id = %entity.id, "entity deleted since scan");
                return;
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.workflow.reporter().report(&e);
                return;
            }
        };

        match tokio::task::spawn_blocking(move || handle.submit_event(event)).await {
            Ok(()) => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let err = TimerError::Dispatch {
                    entity_id: entity.id,
                    reason: e.to_string(),
                };
                tracing::error!(code = err.error_code(), "{}", err);
            }
        }
    }

    /// Signals the dispatcher to shut down. Undelivered events are dropped;
    /// the next scan after restart finds the same entities again.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Returns dispatcher statistics.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Dispatcher statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Events handed to an entity.
    pub dispatched: u64,
    /// Events for entities deleted since the scan.
    pub skipped: u64,
    /// Events that could not be delivered or whose processing panicked.
    pub failed: u64,
}
