//! Request-level operations over scans, proxies and logs.
//!
//! Handlers call these and wrap the outcome in an [`Envelope`], so callers
//! always get `{"success": ..., "data": ..., "error": ...}` back.

use crate::config::EngineConfig;
use crate::error::{CoreError, Result};
use crate::grid::MAX_GRID_SIZE;
use crate::model::{
    Alert, Frequency, LogEntry, LogFilter, LogLevel, NewScan, RankResult, Scan, ScanUpdate,
    ShapeKind,
};
use crate::orchestrator::{Orchestrator, RunSummary};
use gridrank_scanner::{GeoPoint, ProxyCandidate, ProxyStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

const SOURCE: &str = "service";

/// Create payload as submitted by a client. Numeric fields may arrive as
/// numbers or numeric strings; anything unusable falls back to a default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateScanRequest {
    pub keyword: String,
    pub business_name: Option<String>,
    pub radius: Option<Value>,
    pub grid_size: Option<Value>,
    pub shape: Option<String>,
    pub frequency: Option<String>,
    pub custom_points: Option<Vec<GeoPoint>>,
    pub lat: Option<Value>,
    pub lng: Option<Value>,
}

fn lenient_f64(value: &Option<Value>) -> Option<f64> {
    let parsed = match value.as_ref()? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

impl CreateScanRequest {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Default::default()
        }
    }

    /// Apply defaults. Only a missing keyword is rejected.
    pub fn normalize(&self, config: &EngineConfig) -> Result<NewScan> {
        let keyword = self.keyword.trim();
        if keyword.is_empty() {
            return Err(CoreError::Validation("keyword is required".to_string()));
        }

        let center_lat = lenient_f64(&self.lat)
            .filter(|lat| (-90.0..=90.0).contains(lat))
            .unwrap_or(config.default_lat);
        let center_lng = lenient_f64(&self.lng)
            .filter(|lng| (-180.0..=180.0).contains(lng))
            .unwrap_or(config.default_lng);
        let radius = lenient_f64(&self.radius)
            .filter(|r| *r > 0.0)
            .unwrap_or(config.default_radius);
        let grid_size = lenient_f64(&self.grid_size)
            .map(|g| g.trunc() as i64)
            .filter(|g| *g > 0)
            .map(|g| g.min(MAX_GRID_SIZE))
            .unwrap_or(config.default_grid_size);

        let custom_points = self
            .custom_points
            .as_ref()
            .map(|points| {
                points
                    .iter()
                    .copied()
                    .filter(GeoPoint::is_finite)
                    .collect::<Vec<_>>()
            })
            .filter(|points| !points.is_empty());

        Ok(NewScan {
            keyword: keyword.to_string(),
            business_name: self
                .business_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            center_lat,
            center_lng,
            radius,
            grid_size,
            shape: self
                .shape
                .as_deref()
                .map(ShapeKind::parse_lenient)
                .unwrap_or(ShapeKind::Square),
            custom_points,
            frequency: self
                .frequency
                .as_deref()
                .map(Frequency::parse_lenient)
                .unwrap_or(Frequency::Once),
        })
    }
}

/// Uniform response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Status a request layer should answer with.
    #[serde(skip)]
    pub status: u16,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status: 200,
        }
    }

    pub fn failure(err: &CoreError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            status: err.status_code(),
        }
    }
}

impl<T> From<Result<T>> for Envelope<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Envelope::ok(data),
            Err(e) => {
                if e.status_code() >= 500 {
                    error!(kind = e.kind(), "Request failed: {}", e);
                } else {
                    warn!(kind = e.kind(), "Request rejected: {}", e);
                }
                Envelope::failure(&e)
            }
        }
    }
}

/// A scan with its observations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDetails {
    #[serde(flatten)]
    pub scan: Scan,
    pub results: Vec<RankResult>,
    pub alerts: Vec<Alert>,
}

/// A scan whose background run has been started.
#[derive(Debug)]
pub struct Launched {
    pub scan: Scan,
    pub run: JoinHandle<Option<RunSummary>>,
}

#[derive(Clone)]
pub struct ScanService {
    orchestrator: Arc<Orchestrator>,
}

impl ScanService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Persist a new PENDING scan without starting it.
    pub fn insert(&self, request: &CreateScanRequest) -> Result<Scan> {
        let new_scan = request.normalize(self.orchestrator.config())?;
        let scan = self.orchestrator.db().insert_scan(&new_scan)?;
        self.orchestrator.event_log().info(
            SOURCE,
            "Scan created",
            json!({"scanId": scan.id, "keyword": scan.keyword, "shape": scan.shape.as_str()}),
        );
        Ok(scan)
    }

    /// Persist a new scan and start its first run.
    pub fn create(&self, request: &CreateScanRequest) -> Result<Launched> {
        let scan = self.insert(request)?;
        let run = self.orchestrator.trigger(&scan.id);
        Ok(Launched { scan, run })
    }

    pub fn get(&self, scan_id: &str) -> Result<ScanDetails> {
        let db = self.orchestrator.db();
        let scan = db
            .get_scan(scan_id)?
            .ok_or_else(|| CoreError::scan_not_found(scan_id))?;
        Ok(ScanDetails {
            results: db.get_results(scan_id)?,
            alerts: db.get_alerts(scan_id)?,
            scan,
        })
    }

    pub fn list(&self) -> Result<Vec<Scan>> {
        Ok(self.orchestrator.db().list_scans()?)
    }

    /// Partial update. Lifecycle rules are the caller's concern.
    pub fn update(&self, scan_id: &str, update: &ScanUpdate) -> Result<Scan> {
        if update
            .keyword
            .as_deref()
            .is_some_and(|keyword| keyword.trim().is_empty())
        {
            return Err(CoreError::Validation("keyword cannot be empty".to_string()));
        }

        let db = self.orchestrator.db();
        let updated = if update.is_empty() {
            db.get_scan(scan_id)?
        } else {
            db.update_scan(scan_id, update)?
        };
        updated.ok_or_else(|| CoreError::scan_not_found(scan_id))
    }

    pub fn delete(&self, scan_id: &str) -> Result<()> {
        self.orchestrator.cancel_runs(scan_id);
        if !self.orchestrator.db().delete_scan(scan_id)? {
            return Err(CoreError::scan_not_found(scan_id));
        }
        self.orchestrator
            .event_log()
            .info(SOURCE, "Scan deleted", json!({"scanId": scan_id}));
        Ok(())
    }

    /// Wipe results and alerts and start a fresh run; does not wait for it.
    pub fn rerun(&self, scan_id: &str) -> Result<Launched> {
        let (reset, run) = self.orchestrator.rerun(scan_id)?;
        Ok(Launched {
            scan: reset.scan,
            run,
        })
    }

    pub fn stop(&self, scan_id: &str) -> Result<Scan> {
        self.orchestrator.stop(scan_id)
    }

    pub async fn validate_proxies(
        &self,
        candidates: Vec<ProxyCandidate>,
        concurrency: usize,
    ) -> Vec<ProxyStatus> {
        let total = candidates.len();
        let statuses = self
            .orchestrator
            .validate_proxies(candidates, concurrency)
            .await;
        let reachable = statuses.iter().filter(|s| s.success).count();
        self.orchestrator.event_log().info(
            "proxy",
            "Proxy batch validated",
            json!({"total": total, "reachable": reachable, "concurrency": concurrency}),
        );
        statuses
    }

    pub fn append_log(
        &self,
        level: LogLevel,
        source: &str,
        message: &str,
        context: Value,
    ) -> Result<i64> {
        self.orchestrator
            .event_log()
            .record(level, source, message, context)
    }

    pub fn logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        self.orchestrator.event_log().query(filter)
    }

    pub fn clear_logs(&self) -> Result<usize> {
        self.orchestrator.event_log().clear()
    }
}
