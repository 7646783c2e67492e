//! Periodic counter resets.
//!
//! [`ResetJob`] is the callback: one pass that zeroes every counter.
//! [`ResetScheduler`] is one possible trigger for it, firing at every top of
//! the hour (UTC). Any other trigger (cron, a managed job runner, the admin
//! API) can call [`ResetJob::run_once`] directly; the pass is idempotent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::store::{CounterStore, StoreError};
use crate::window;

/// A unit of work fired by a timer.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Zeroes every project's counter, premium or not.
#[derive(Clone)]
pub struct ResetJob {
    store: Arc<dyn CounterStore>,
}

impl ResetJob {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Run a single reset pass and return how many counters were zeroed.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let reset = self.store.reset_all().await?;
        if reset == 0 {
            info!("no counters to reset");
        } else {
            info!(reset, "project counters reset to zero");
        }
        Ok(reset)
    }
}

#[async_trait]
impl ScheduledTask for ResetJob {
    fn name(&self) -> &'static str {
        "project-counter-reset"
    }

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.run_once().await?;
        Ok(())
    }
}

/// When a [`ResetScheduler`] fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// At every top of the hour, UTC.
    TopOfHour,
    /// At a fixed interval from the previous run.
    Every(Duration),
}

impl Schedule {
    fn delay(&self) -> Duration {
        match self {
            Schedule::TopOfHour => window::until_next_window(Utc::now()),
            Schedule::Every(interval) => *interval,
        }
    }
}

/// Background loop that fires a [`ScheduledTask`] on a [`Schedule`].
///
/// A failing run is logged and the loop waits for the next tick; missed
/// ticks are never replayed.
pub struct ResetScheduler {
    task: Arc<dyn ScheduledTask>,
    schedule: Schedule,
    shutdown: Arc<Notify>,
}

impl ResetScheduler {
    pub fn new(task: Arc<dyn ScheduledTask>, schedule: Schedule) -> Self {
        Self {
            task,
            schedule,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Hourly scheduler for the standard counter reset.
    pub fn hourly(job: ResetJob) -> Self {
        Self::new(Arc::new(job), Schedule::TopOfHour)
    }

    /// Run until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) {
        info!(task = self.task.name(), schedule = ?self.schedule, "scheduler started");

        loop {
            let delay = self.schedule.delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified() => {
                    info!(task = self.task.name(), "scheduler shutting down");
                    return;
                }
            }

            match self.task.run().await {
                Ok(()) => tracing::debug!(task = self.task.name(), "scheduled run completed"),
                Err(e) => error!(
                    task = self.task.name(),
                    error = %e,
                    "scheduled run failed; retrying on next tick"
                ),
            }
        }
    }

    /// Signal the loop to exit. Safe to call before [`run`](Self::run).
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
