//! Scan state machine.
//!
//! ```text
//! PENDING ──claim──▶ RUNNING ──▶ COMPLETED | FAILED | STOPPED (cancel)
//!    ▲                  │
//!    └── reschedule ────┤        (recurring scans)
//!    └── reclaim ───────┘        (run abandoned by a dead process)
//!
//! any ──stop──▶ STOPPED          any ──reset──▶ PENDING
//! ```
//!
//! [`Transition`] is the only place the rules live: every status write in the
//! store builds its `WHERE status IN (..)` guard from [`Transition::guard`].
//! The claim is a single conditional UPDATE, so two triggers for the same scan
//! can never both reach RUNNING. Writes that end a run are also conditioned on
//! the run id stamped by the claim.

use crate::data::{Database, ResetSummary};
use crate::error::{CoreError, Result};
use crate::model::{Frequency, Scan, ScanStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Claim,
    Complete,
    Reschedule,
    Fail,
    /// A run that saw its token cancelled while still owning the scan.
    Cancel,
    /// A RUNNING scan whose run is no longer alive goes back to the queue.
    Reclaim,
    Stop,
    Reset,
}

impl Transition {
    pub fn target(&self) -> ScanStatus {
        match self {
            Transition::Claim => ScanStatus::Running,
            Transition::Complete => ScanStatus::Completed,
            Transition::Reschedule | Transition::Reclaim | Transition::Reset => ScanStatus::Pending,
            Transition::Fail => ScanStatus::Failed,
            Transition::Cancel | Transition::Stop => ScanStatus::Stopped,
        }
    }

    pub fn allowed_from(&self, from: ScanStatus) -> bool {
        match self {
            Transition::Claim => from == ScanStatus::Pending,
            Transition::Complete
            | Transition::Reschedule
            | Transition::Fail
            | Transition::Cancel
            | Transition::Reclaim => from == ScanStatus::Running,
            Transition::Stop | Transition::Reset => true,
        }
    }

    /// Statuses this transition may leave from.
    pub fn sources(&self) -> Vec<ScanStatus> {
        ScanStatus::ALL
            .into_iter()
            .filter(|from| self.allowed_from(*from))
            .collect()
    }

    /// SQL condition on the `status` column matching [`Transition::sources`].
    pub(crate) fn guard(&self) -> String {
        let sources: Vec<String> = self
            .sources()
            .iter()
            .map(|status| format!("'{}'", status.as_str()))
            .collect();
        format!("status IN ({})", sources.join(", "))
    }
}

/// How a run ended, before the store is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    /// The run observed a cancellation. Settles as STOPPED only when the run
    /// still owns the scan; a stop or reset already wrote its own state.
    Cancelled,
}

/// Transition and next run time after a successful run.
pub fn settle_success(frequency: Frequency, now: DateTime<Utc>) -> (Transition, Option<DateTime<Utc>>) {
    match frequency.cadence() {
        Some(cadence) => (Transition::Reschedule, Some(now + cadence)),
        None => (Transition::Complete, None),
    }
}

/// Proof of a successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    pub scan_id: String,
    pub run_id: String,
}

#[derive(Clone)]
pub struct Lifecycle {
    db: Arc<Database>,
}

impl Lifecycle {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Move the scan to RUNNING under a fresh run id.
    pub fn claim(&self, scan_id: &str) -> Result<RunTicket> {
        if let Some(run_id) = self.db.claim_run(scan_id)? {
            debug!("Claimed scan {} as run {}", scan_id, run_id);
            return Ok(RunTicket {
                scan_id: scan_id.to_string(),
                run_id,
            });
        }

        match self.db.get_scan(scan_id)? {
            None => Err(CoreError::scan_not_found(scan_id)),
            // PENDING here means another trigger claimed and settled it in between.
            Some(scan)
                if scan.status == Transition::Claim.target()
                    || Transition::Claim.allowed_from(scan.status) =>
            {
                Err(CoreError::AlreadyRunning(scan_id.to_string()))
            }
            Some(scan) => Err(CoreError::InvalidTransition {
                scan_id: scan_id.to_string(),
                from: scan.status,
                to: Transition::Claim.target(),
            }),
        }
    }

    /// Record the end of a run. Returns the status written, or `None` when the
    /// run no longer owns the scan (stopped, reset or deleted meanwhile).
    pub fn finish(
        &self,
        ticket: &RunTicket,
        frequency: Frequency,
        outcome: RunOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<ScanStatus>> {
        let (transition, next_run) = match outcome {
            RunOutcome::Succeeded => settle_success(frequency, now),
            RunOutcome::Failed => (Transition::Fail, None),
            RunOutcome::Cancelled => (Transition::Cancel, None),
        };

        let applied = self
            .db
            .finish_run(&ticket.scan_id, &ticket.run_id, transition, next_run)?;
        if applied {
            let status = transition.target();
            info!("Scan {} settled as {}", ticket.scan_id, status.as_str());
            Ok(Some(status))
        } else {
            debug!(
                "Run {} of scan {} no longer owns the scan, leaving status untouched",
                ticket.run_id, ticket.scan_id
            );
            Ok(None)
        }
    }

    /// Put a scan whose run was abandoned back in the queue, due at `now`.
    /// Returns false when the run no longer holds the scan.
    pub fn reclaim(&self, ticket: &RunTicket, now: DateTime<Utc>) -> Result<bool> {
        let reclaimed = self
            .db
            .reclaim_run(&ticket.scan_id, &ticket.run_id, now)?;
        if reclaimed {
            info!(
                "Scan {} reclaimed from abandoned run {}",
                ticket.scan_id, ticket.run_id
            );
        }
        Ok(reclaimed)
    }

    pub fn stop(&self, scan_id: &str) -> Result<Scan> {
        self.db
            .mark_stopped(scan_id)?
            .ok_or_else(|| CoreError::scan_not_found(scan_id))
    }

    pub fn reset(&self, scan_id: &str) -> Result<ResetSummary> {
        self.db
            .reset_for_rerun(scan_id)?
            .ok_or_else(|| CoreError::scan_not_found(scan_id))
    }
}
