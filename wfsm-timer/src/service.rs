//! Scheduler and dispatcher wired together for one workflow.

use crate::config::SchedulerConfig;
use crate::dispatcher::TimedEventDispatcher;
use crate::scheduler::TimedEventScheduler;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wfsm_core::Workflow;

/// Background timer tasks for one workflow.
pub struct TimerService {
    scheduler: Arc<TimedEventScheduler>,
    dispatcher: Arc<TimedEventDispatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl TimerService {
    /// Spawns the scheduler and dispatcher on the current tokio runtime.
    pub fn start(workflow: Workflow, config: &SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(TimedEventScheduler::new(
            workflow.clone(),
            config.clone(),
            tx,
        ));
        let dispatcher = Arc::new(TimedEventDispatcher::new(workflow, rx));

        let tasks = vec![
            tokio::spawn({
                let scheduler = scheduler.clone();
                async move { scheduler.run().await }
            }),
            tokio::spawn({
                let dispatcher = dispatcher.clone();
                async move { dispatcher.run().await }
            }),
        ];

        Self {
            scheduler,
            dispatcher,
            tasks,
        }
    }

    pub fn scheduler(&self) -> &Arc<TimedEventScheduler> {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &Arc<TimedEventDispatcher> {
        &self.dispatcher
    }

    /// Stops both tasks and waits for them to finish.
    pub async fn shutdown(self) {
        self.scheduler.shutdown();
        self.dispatcher.shutdown();

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "timer task ended abnormally");
            }
        }
    }
}
