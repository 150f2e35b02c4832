//! Runs scans: claim, resolve points, probe, persist, alert, settle.
//!
//! Probing is bounded by `probe_concurrency`. Before each grid point the run
//! checks its cancellation token and then the store, since a stop issued by
//! another process never reaches the token. Every write is conditioned on the
//! run id, so a run that has been reset away can no longer touch the scan.

use crate::alerts::{AlertPolicy, Observation, ThresholdPolicy, evaluate_all};
use crate::config::EngineConfig;
use crate::data::{Database, ResetSummary};
use crate::error::{CoreError, Result};
use crate::grid;
use crate::lifecycle::{Lifecycle, RunOutcome, RunTicket};
use crate::logs::EventLog;
use crate::model::{NewResult, Scan, ScanStatus};
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt, stream};
use gridrank_scanner::{
    GeoPoint, HttpPointSource, HttpRankProbe, PointSource, ProxyCandidate, ProxyStatus,
    ProxyValidator, RankProbe, RankQuery, VantagePool,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const SOURCE: &str = "orchestrator";

/// What one run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub scan_id: String,
    pub run_id: String,
    /// Scan status after settling; `None` if the scan was deleted mid-run.
    pub status: Option<ScanStatus>,
    pub points: usize,
    pub probed: usize,
    pub found: usize,
    pub failed: usize,
    pub alerts: usize,
    pub cancelled: bool,
}

type RunRegistry = Arc<Mutex<HashMap<String, Vec<(String, CancellationToken)>>>>;

/// Keeps a run's token reachable by `stop`/`rerun` for as long as the run lives.
struct Registration {
    registry: RunRegistry,
    scan_id: String,
    run_id: String,
    token: CancellationToken,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut runs = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slots) = runs.get_mut(&self.scan_id) {
            slots.retain(|(run_id, _)| run_id != &self.run_id);
            if slots.is_empty() {
                runs.remove(&self.scan_id);
            }
        }
    }
}

pub struct Orchestrator {
    db: Arc<Database>,
    lifecycle: Lifecycle,
    log: EventLog,
    probe: Arc<dyn RankProbe>,
    point_source: Option<Arc<dyn PointSource>>,
    policy: Arc<dyn AlertPolicy>,
    validator: ProxyValidator,
    candidates: Vec<ProxyCandidate>,
    vantages: VantagePool,
    config: EngineConfig,
    runs: RunRegistry,
}

impl Orchestrator {
    pub fn new(db: Arc<Database>, probe: Arc<dyn RankProbe>, config: EngineConfig) -> Self {
        let validator = ProxyValidator::with_timeout(config.proxy_timeout())
            .with_test_url(config.proxy_test_url.clone());
        let candidates = if config.use_proxies {
            config.proxies.clone()
        } else {
            Vec::new()
        };

        Self {
            lifecycle: Lifecycle::new(db.clone()),
            log: EventLog::new(db.clone()),
            db,
            probe,
            point_source: None,
            policy: Arc::new(ThresholdPolicy::new(config.alert_threshold)),
            validator,
            candidates,
            vantages: VantagePool::new(),
            config,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// HTTP probe and point source built from the configured endpoints.
    pub fn from_config(db: Arc<Database>, config: EngineConfig) -> Result<Self> {
        let probe = HttpRankProbe::with_timeout(&config.search_endpoint, config.probe_timeout())?;
        let point_source = match config.places_endpoint {
            Some(ref endpoint) => Some(HttpPointSource::new(endpoint, config.probe_timeout())?),
            None => None,
        };

        let mut orchestrator = Self::new(db, Arc::new(probe), config);
        if let Some(source) = point_source {
            orchestrator = orchestrator.with_point_source(Arc::new(source));
        }
        Ok(orchestrator)
    }

    pub fn with_point_source(mut self, source: Arc<dyn PointSource>) -> Self {
        self.point_source = Some(source);
        self
    }

    pub fn with_alert_policy(mut self, policy: Arc<dyn AlertPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Route probes through these proxies, refreshed by validation at the start of each run.
    pub fn with_proxies(mut self, candidates: Vec<ProxyCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_validator(mut self, validator: ProxyValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn vantage_pool(&self) -> &VantagePool {
        &self.vantages
    }

    /// Whether a run of this scan is live in this process.
    pub fn is_active(&self, scan_id: &str) -> bool {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(scan_id)
    }

    fn owns_run(&self, ticket: &RunTicket) -> bool {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ticket.scan_id)
            .is_some_and(|slots| slots.iter().any(|(run_id, _)| run_id == &ticket.run_id))
    }

    /// Requeue RUNNING scans whose claim is older than `stale_run_secs` and
    /// whose run is not live here, e.g. left behind by a killed foreground run.
    /// Returns how many were requeued.
    pub fn reclaim_stale_runs(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.config.stale_run_after();
        let mut reclaimed = 0;

        for (scan_id, run_id) in self.db.stale_runs(cutoff)? {
            let ticket = RunTicket { scan_id, run_id };
            if self.owns_run(&ticket) {
                continue;
            }
            if self.lifecycle.reclaim(&ticket, now)? {
                self.log.warn(
                    SOURCE,
                    "Reclaimed scan left RUNNING by an abandoned run",
                    json!({"scanId": ticket.scan_id, "runId": ticket.run_id}),
                );
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    fn register(&self, ticket: &RunTicket) -> Registration {
        let token = CancellationToken::new();
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(ticket.scan_id.clone())
            .or_default()
            .push((ticket.run_id.clone(), token.clone()));
        Registration {
            registry: self.runs.clone(),
            scan_id: ticket.scan_id.clone(),
            run_id: ticket.run_id.clone(),
            token,
        }
    }

    /// Signal every in-flight run of the scan. Returns how many were signalled.
    pub fn cancel_runs(&self, scan_id: &str) -> usize {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        match runs.get(scan_id) {
            Some(slots) => {
                for (_, token) in slots {
                    token.cancel();
                }
                slots.len()
            }
            None => 0,
        }
    }

    pub async fn validate_proxies(
        &self,
        candidates: Vec<ProxyCandidate>,
        concurrency: usize,
    ) -> Vec<ProxyStatus> {
        self.validator.validate_batch(candidates, concurrency).await
    }

    /// Re-validate the configured proxies and rebuild the vantage pool.
    /// Returns the number of usable proxies.
    pub async fn refresh_vantages(&self) -> usize {
        if self.candidates.is_empty() {
            return 0;
        }

        let statuses = self
            .validator
            .validate_batch(self.candidates.clone(), self.config.proxy_concurrency)
            .await;
        let usable = self.vantages.refresh(&self.candidates, &statuses);

        let context = json!({"candidates": self.candidates.len(), "usable": usable});
        if usable == 0 {
            self.log
                .warn("proxy", "No proxy passed validation, probing directly", context);
        } else {
            self.log.info("proxy", "Vantage pool refreshed", context);
        }
        usable
    }

    /// Run a scan to completion in the current task.
    pub async fn run_scan(&self, scan_id: &str) -> Result<RunSummary> {
        let ticket = self.lifecycle.claim(scan_id)?;
        let registration = self.register(&ticket);

        // A stop landing between the claim and the registration never saw our token.
        let scan = match self.db.get_scan(scan_id)? {
            Some(scan) => scan,
            None => return Err(CoreError::scan_not_found(scan_id)),
        };
        if scan.status != ScanStatus::Running || scan.run_id.as_deref() != Some(&ticket.run_id) {
            registration.token.cancel();
        }

        self.log.info(
            SOURCE,
            "Scan run started",
            json!({"scanId": scan_id, "runId": ticket.run_id, "keyword": scan.keyword}),
        );

        let executed = AssertUnwindSafe(self.execute(&scan, &ticket, &registration.token))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(CoreError::Internal(format!("scan run panicked: {}", reason)))
            });

        match executed {
            Ok(mut summary) => {
                let outcome = if summary.cancelled {
                    RunOutcome::Cancelled
                } else {
                    RunOutcome::Succeeded
                };
                let settled = self
                    .lifecycle
                    .finish(&ticket, scan.frequency, outcome, Utc::now())?;
                summary.status = match settled {
                    Some(status) => Some(status),
                    None => self.db.get_scan(scan_id)?.map(|s| s.status),
                };

                self.log.info(
                    SOURCE,
                    "Scan run finished",
                    json!({
                        "scanId": scan_id,
                        "runId": ticket.run_id,
                        "status": summary.status.map(|s| s.as_str()),
                        "probed": summary.probed,
                        "found": summary.found,
                        "failed": summary.failed,
                        "alerts": summary.alerts,
                        "cancelled": summary.cancelled,
                    }),
                );
                Ok(summary)
            }
            Err(e) => {
                self.log.error(
                    SOURCE,
                    "Scan run failed",
                    json!({
                        "scanId": scan_id,
                        "runId": ticket.run_id,
                        "kind": e.kind(),
                        "error": e.to_string(),
                    }),
                );
                if let Err(settle_err) =
                    self.lifecycle
                        .finish(&ticket, scan.frequency, RunOutcome::Failed, Utc::now())
                {
                    self.log.error(
                        SOURCE,
                        "Could not mark scan as failed",
                        json!({"scanId": scan_id, "error": settle_err.to_string()}),
                    );
                }
                Err(e)
            }
        }
    }

    /// Start a run in the background. The handle yields `None` when the run
    /// did not start or failed; failures are written to the log stream.
    pub fn trigger(self: &Arc<Self>, scan_id: &str) -> JoinHandle<Option<RunSummary>> {
        let this = Arc::clone(self);
        let scan_id = scan_id.to_string();

        tokio::spawn(async move {
            match this.run_scan(&scan_id).await {
                Ok(summary) => Some(summary),
                Err(CoreError::AlreadyRunning(_)) => {
                    debug!("Scan {} already running, trigger ignored", scan_id);
                    None
                }
                Err(e @ CoreError::InvalidTransition { .. }) => {
                    debug!("Trigger ignored: {}", e);
                    None
                }
                Err(e @ CoreError::NotFound { .. }) => {
                    this.log.warn(
                        SOURCE,
                        "Triggered scan does not exist",
                        json!({"scanId": scan_id, "error": e.to_string()}),
                    );
                    None
                }
                // Run failures were already logged by run_scan.
                Err(_) => None,
            }
        })
    }

    /// Mark the scan STOPPED and signal any in-flight run.
    pub fn stop(&self, scan_id: &str) -> Result<Scan> {
        let scan = self.lifecycle.stop(scan_id)?;
        let cancelled = self.cancel_runs(scan_id);
        self.log.info(
            SOURCE,
            "Scan stopped",
            json!({"scanId": scan_id, "cancelledRuns": cancelled}),
        );
        Ok(scan)
    }

    /// Cancel any in-flight run, wipe results and alerts, and start a fresh run.
    pub fn rerun(self: &Arc<Self>, scan_id: &str) -> Result<(ResetSummary, JoinHandle<Option<RunSummary>>)> {
        self.cancel_runs(scan_id);
        let reset = self.lifecycle.reset(scan_id)?;
        self.log.info(
            SOURCE,
            "Scan reset for rerun",
            json!({
                "scanId": scan_id,
                "resultsDeleted": reset.results_deleted,
                "alertsDeleted": reset.alerts_deleted,
            }),
        );
        let handle = self.trigger(scan_id);
        Ok((reset, handle))
    }

    async fn resolve_points(&self, scan: &Scan) -> Result<Vec<GeoPoint>> {
        if let Some(points) = grid::planned_points(scan) {
            return Ok(points);
        }

        let source = self.point_source.as_ref().ok_or_else(|| {
            CoreError::Validation(format!(
                "scan {} uses SMART points but no point source is configured",
                scan.id
            ))
        })?;
        let points = source
            .points(
                scan.center(),
                scan.radius,
                &scan.keyword,
                self.config.smart_point_limit,
            )
            .await?;
        debug!("Resolved {} SMART points for scan {}", points.len(), scan.id);
        Ok(points)
    }

    async fn execute(
        &self,
        scan: &Scan,
        ticket: &RunTicket,
        token: &CancellationToken,
    ) -> Result<RunSummary> {
        let points = self.resolve_points(scan).await?;
        let history = self.db.rank_history(&scan.id)?;

        if !self.candidates.is_empty() && !token.is_cancelled() {
            self.refresh_vantages().await;
        }

        let mut summary = RunSummary {
            scan_id: ticket.scan_id.clone(),
            run_id: ticket.run_id.clone(),
            status: None,
            points: points.len(),
            probed: 0,
            found: 0,
            failed: 0,
            alerts: 0,
            cancelled: false,
        };
        info!(
            "Probing {} points for scan {} ({})",
            points.len(),
            scan.id,
            scan.keyword
        );

        let concurrency = self.config.probe_concurrency.max(1);
        let mut probes = stream::iter(points.iter().copied().enumerate())
            .map(move |(index, point)| {
                self.probe_point(scan, ticket, index as i64, point, token)
            })
            .buffer_unordered(concurrency);

        let mut observations = Vec::new();
        while let Some(probed) = probes.next().await {
            let Some(result) = probed else {
                continue;
            };
            summary.probed += 1;

            if self
                .db
                .insert_result(&ticket.scan_id, &ticket.run_id, &result)?
                .is_none()
            {
                debug!(
                    "Run {} of scan {} was superseded, discarding remaining points",
                    ticket.run_id, ticket.scan_id
                );
                token.cancel();
                continue;
            }

            if result.error.is_some() {
                summary.failed += 1;
                continue;
            }
            if result.rank.is_some() {
                summary.found += 1;
            }
            observations.push(Observation {
                grid_index: result.grid_index,
                point: result.point,
                rank: result.rank,
            });
        }
        drop(probes);
        summary.cancelled = token.is_cancelled();

        for alert in evaluate_all(self.policy.as_ref(), &history, &observations) {
            if self
                .db
                .insert_alert(&ticket.scan_id, &ticket.run_id, &alert)?
                .is_some()
            {
                summary.alerts += 1;
            }
        }

        let ranks: Vec<(i64, Option<u32>)> = observations
            .iter()
            .map(|obs| (obs.grid_index, obs.rank))
            .collect();
        self.db
            .record_rank_history(&ticket.scan_id, &ticket.run_id, &ranks)?;

        Ok(summary)
    }

    async fn probe_point(
        &self,
        scan: &Scan,
        ticket: &RunTicket,
        grid_index: i64,
        point: GeoPoint,
        token: &CancellationToken,
    ) -> Option<NewResult> {
        if token.is_cancelled() {
            return None;
        }
        // Stops issued from another process only show up in the store.
        match self.db.run_is_live(&ticket.scan_id, &ticket.run_id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    "Run {} of scan {} no longer owns the scan, cancelling",
                    ticket.run_id, ticket.scan_id
                );
                token.cancel();
                return None;
            }
            Err(e) => debug!("Could not check run {}: {}", ticket.run_id, e),
        }

        let vantage = self.vantages.next();
        let query = RankQuery {
            keyword: scan.keyword.clone(),
            business_name: scan.business_name.clone(),
            point,
        };

        let result = match self.probe.probe(&query, &vantage).await {
            Ok(outcome) => NewResult {
                grid_index,
                point,
                rank: outcome.rank,
                vantage: vantage.label(),
                error: None,
                payload: outcome.payload,
                checked_at: Utc::now(),
            },
            Err(e) => {
                debug!("Probe {} of scan {} failed: {}", grid_index, scan.id, e);
                NewResult {
                    grid_index,
                    point,
                    rank: None,
                    vantage: vantage.label(),
                    error: Some(e.to_string()),
                    payload: None,
                    checked_at: Utc::now(),
                }
            }
        };
        Some(result)
    }
}
