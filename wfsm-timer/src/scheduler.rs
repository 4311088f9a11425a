//! Periodic scan for entities with a due timed transition.

use crate::config::SchedulerConfig;
use crate::error::TimerError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use wfsm_core::{CoreError, Entity, Event, TimerFired, Workflow};

/// A due entity paired with the timer event to apply to it.
#[derive(Debug, Clone)]
pub struct TimerDispatch {
    pub entity: Entity,
    pub event: Event,
}

/// Scans one workflow's store for due entities on a fixed cadence and sends
/// a [`TimerDispatch`] for each to the dispatcher.
pub struct TimedEventScheduler {
    workflow: Workflow,
    config: SchedulerConfig,
    sender: mpsc::UnboundedSender<TimerDispatch>,
    ticks: AtomicU64,
    due_entities: AtomicU64,
    scan_failures: AtomicU64,
    shutdown: AtomicBool,
    notify: Notify,
}

impl TimedEventScheduler {
    pub fn new(
        workflow: Workflow,
        config: SchedulerConfig,
        sender: mpsc::UnboundedSender<TimerDispatch>,
    ) -> Self {
        Self {
            workflow,
            config,
            sender,
            ticks: AtomicU64::new(0),
            due_entities: AtomicU64::new(0),
            scan_failures: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Runs one scan. Returns the number of timer events sent.
    pub fn tick(&self) -> Result<usize, TimerError> {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let kind = self.workflow.kind();
        let now = self.workflow.clock().now_millis();
        let due = self
            .workflow
            .store()
            .find_due(kind, now)
            .map_err(|source| TimerError::Scan {
                kind: kind.to_string(),
                source,
            })?;

        let count = due.len();
        for entity in due {
            let event = Event::Timer(TimerFired::scheduled(
                entity.elapsed_since_transition(now),
                entity.timed_event_at,
            ));
            tracing::debug!(
                kind,
                entity_id = %entity.id,
                state = %entity.state,
                "timed transition due"
            );
            self.sender
                .send(TimerDispatch { entity, event })
                .map_err(|_| TimerError::ChannelClosed)?;
        }

        self.due_entities.fetch_add(count as u64, Ordering::Relaxed);
        Ok(count)
    }

    /// Runs the scan loop (call from a background task).
    pub async fn run(&self) {
        if !self.config.enabled {
            tracing::info!(kind = self.workflow.kind(), "Timed event scheduler is disabled");
            return;
        }

        tracing::info!(
            "Timed event scheduler started for {} (warmup={}ms, interval={}ms)",
            self.workflow.kind(),
            self.config.warmup_ms,
            self.config.interval_ms
        );

        let mut delay = self.config.warmup();
        while self.wait(delay).await {
            delay = self.config.interval();

            match self.tick() {
                Ok(0) => {}
                Ok(count) => {
                    tracing::debug!(kind = self.workflow.kind(), count, "scheduled timer events");
                }
                Err(TimerError::ChannelClosed) => {
                    tracing::warn!(kind = self.workflow.kind(), "dispatcher gone, stopping scheduler");
                    break;
                }
                Err(TimerError::Scan { kind, source }) => {
                    self.scan_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(kind = %kind, error = %source, "due-entity scan failed");
                    self.workflow.reporter().report(&CoreError::Store(source));
                }
                Err(e) => {
                    self.scan_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(code = e.error_code(), "{}", e);
                }
            }
        }

        tracing::info!("Timed event scheduler stopped for {}", self.workflow.kind());
    }

    /// Sleeps for `delay` unless shut down first. Returns false once shut down.
    async fn wait(&self, delay: Duration) -> bool {
        if self.shutdown.load(Ordering::Relaxed) {
            return false;
        }

        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }

        !self.shutdown.load(Ordering::Relaxed)
    }

    /// Signals the scheduler to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Returns scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            due_entities: self.due_entities.load(Ordering::Relaxed),
            scan_failures: self.scan_failures.load(Ordering::Relaxed),
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub due_entities: u64,
    pub scan_failures: u64,
}
