// Recurring-scan trigger loop

use crate::error::Result;
use crate::orchestrator::{Orchestrator, RunSummary};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let interval = orchestrator.config().scheduler_interval();
        Self {
            orchestrator,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Requeue abandoned runs, then trigger every PENDING scan whose
    /// `next_run` is at or before `now`.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<Option<RunSummary>>>> {
        let reclaimed = self.orchestrator.reclaim_stale_runs(now)?;
        if reclaimed > 0 {
            info!("Requeued {} scan(s) left RUNNING by abandoned runs", reclaimed);
        }

        let due = self.orchestrator.db().due_scans(now)?;
        if !due.is_empty() {
            info!("{} scheduled scan(s) due", due.len());
        }
        Ok(due
            .iter()
            .map(|scan_id| {
                debug!("Triggering scheduled scan {}", scan_id);
                self.orchestrator.trigger(scan_id)
            })
            .collect())
    }

    /// Poll until `shutdown` is cancelled. In-flight runs are left to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Scheduler polling every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()) {
                        error!("Scheduler tick failed: {}", e);
                    }
                }
            }
        }
    }
}
