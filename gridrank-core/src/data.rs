use crate::lifecycle::Transition;
use crate::model::{
    Alert, AlertKind, Frequency, LogEntry, LogFilter, LogLevel, NewAlert, NewResult, NewScan,
    RankResult, Scan, ScanStatus, ScanUpdate, ShapeKind,
};
use chrono::{DateTime, Utc};
use gridrank_scanner::GeoPoint;
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{Connection, OptionalExtension, Result, Row, params, params_from_iter};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub const DEFAULT_LOG_LIMIT: usize = 100;

/// SQLite-backed store for scans, their results and alerts, and the log stream.
///
/// The connection sits behind a mutex so the store can be shared between
/// async tasks; the lock is never held across an await point.
pub struct Database {
    conn: Mutex<Connection>,
}

/// Rows removed by a rerun-reset.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetSummary {
    pub scan: Scan,
    pub results_deleted: usize,
    pub alerts_deleted: usize,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

#[derive(Debug)]
struct UnknownVariant(String);

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

const SCAN_COLUMNS: &str = "id, keyword, business_name, center_lat, center_lng, radius, grid_size,
     shape, custom_points, frequency, status, next_run, run_id, last_run_at, created_at, updated_at";

fn scan_from_row(row: &Row<'_>) -> Result<Scan> {
    let custom_points: Option<String> = row.get(8)?;
    let custom_points = custom_points
        .map(|json| serde_json::from_str::<Vec<GeoPoint>>(&json))
        .transpose()
        .map_err(|e| conversion_error(8, e))?;

    let shape: String = row.get(7)?;
    let frequency: String = row.get(9)?;
    let status: String = row.get(10)?;
    let status =
        ScanStatus::parse(&status).ok_or_else(|| conversion_error(10, UnknownVariant(status)))?;

    Ok(Scan {
        id: row.get(0)?,
        keyword: row.get(1)?,
        business_name: row.get(2)?,
        center_lat: row.get(3)?,
        center_lng: row.get(4)?,
        radius: row.get(5)?,
        grid_size: row.get(6)?,
        shape: ShapeKind::parse_lenient(&shape),
        custom_points,
        frequency: Frequency::parse_lenient(&frequency),
        status,
        next_run: row.get::<_, Option<i64>>(11)?.map(to_datetime),
        run_id: row.get(12)?,
        last_run_at: row.get::<_, Option<i64>>(13)?.map(to_datetime),
        created_at: to_datetime(row.get(14)?),
        updated_at: to_datetime(row.get(15)?),
    })
}

fn result_from_row(row: &Row<'_>) -> Result<RankResult> {
    Ok(RankResult {
        id: row.get(0)?,
        scan_id: row.get(1)?,
        run_id: row.get(2)?,
        grid_index: row.get(3)?,
        lat: row.get(4)?,
        lng: row.get(5)?,
        rank: row.get(6)?,
        vantage: row.get(7)?,
        error: row.get(8)?,
        payload: row.get(9)?,
        checked_at: to_datetime(row.get(10)?),
    })
}

fn alert_from_row(row: &Row<'_>) -> Result<Alert> {
    let kind: String = row.get(3)?;
    Ok(Alert {
        id: row.get(0)?,
        scan_id: row.get(1)?,
        result_id: row.get(2)?,
        kind: AlertKind::parse(&kind).ok_or_else(|| conversion_error(3, UnknownVariant(kind)))?,
        message: row.get(4)?,
        previous_rank: row.get(5)?,
        current_rank: row.get(6)?,
        created_at: to_datetime(row.get(7)?),
    })
}

fn log_from_row(row: &Row<'_>) -> Result<LogEntry> {
    let level: String = row.get(1)?;
    let context: Option<String> = row.get(4)?;
    let context = match context {
        Some(json) => serde_json::from_str(&json).map_err(|e| conversion_error(4, e))?,
        None => serde_json::Value::Null,
    };
    Ok(LogEntry {
        id: row.get(0)?,
        level: LogLevel::parse(&level).ok_or_else(|| conversion_error(1, UnknownVariant(level)))?,
        source: row.get(2)?,
        message: row.get(3)?,
        context,
        created_at: to_datetime(row.get(5)?),
    })
}

fn points_to_json(points: &Option<Vec<GeoPoint>>) -> Result<Option<String>> {
    points
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

impl Database {
    /// Remove the database file along with any WAL sidecars.
    pub fn drop(path: &Path) -> io::Result<()> {
        fs::remove_file(path)?;
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = Path::new(&sidecar);
            if sidecar.exists() {
                fs::remove_file(sidecar)?;
            }
        }
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        Self::with_connection(conn)
    }

    /// Throwaway store, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scans (
    id TEXT PRIMARY KEY,
    keyword TEXT NOT NULL,
    business_name TEXT,
    center_lat REAL NOT NULL,
    center_lng REAL NOT NULL,
    radius REAL NOT NULL,
    grid_size INTEGER NOT NULL,
    shape TEXT NOT NULL CHECK(shape IN ('SQUARE', 'SMART', 'CUSTOM')),
    custom_points TEXT,       -- JSON array of {lat, lng}
    frequency TEXT NOT NULL CHECK(frequency IN ('ONCE', 'DAILY', 'WEEKLY', 'MONTHLY')),
    status TEXT NOT NULL CHECK(status IN ('PENDING', 'RUNNING', 'COMPLETED', 'FAILED', 'STOPPED')),
    next_run INTEGER,
    run_id TEXT,              -- run currently holding the guard
    last_run_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scans_due ON scans(status, next_run);
CREATE INDEX IF NOT EXISTS idx_scans_created ON scans(created_at);

-- One row per grid point per run
CREATE TABLE IF NOT EXISTS results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    grid_index INTEGER NOT NULL,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    rank INTEGER,             -- NULL when the business was not found
    vantage TEXT NOT NULL,
    error TEXT,
    payload TEXT,             -- JSON of the matched listing
    checked_at INTEGER NOT NULL,

    FOREIGN KEY(scan_id) REFERENCES scans(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_results_scan ON results(scan_id, grid_index);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id TEXT NOT NULL,
    result_id INTEGER,
    kind TEXT NOT NULL CHECK(kind IN ('RANK_DROP', 'RANK_GAIN', 'LOST_VISIBILITY', 'NEW_VISIBILITY')),
    message TEXT NOT NULL,
    previous_rank INTEGER,
    current_rank INTEGER,
    created_at INTEGER NOT NULL,

    FOREIGN KEY(scan_id) REFERENCES scans(id) ON DELETE CASCADE,
    FOREIGN KEY(result_id) REFERENCES results(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_alerts_scan ON alerts(scan_id);

-- Last observed rank per grid point; survives rerun-reset
CREATE TABLE IF NOT EXISTS rank_history (
    scan_id TEXT NOT NULL,
    grid_index INTEGER NOT NULL,
    rank INTEGER,
    recorded_at INTEGER NOT NULL,

    PRIMARY KEY(scan_id, grid_index),
    FOREIGN KEY(scan_id) REFERENCES scans(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    level TEXT NOT NULL CHECK(level IN ('debug', 'info', 'warn', 'error')),
    source TEXT NOT NULL,
    message TEXT NOT NULL,
    context TEXT,             -- JSON object
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
CREATE INDEX IF NOT EXISTS idx_logs_source ON logs(source);
            ",
        )?;
        Ok(())
    }

    // Scan management
    pub fn insert_scan(&self, new_scan: &NewScan) -> Result<Scan> {
        let scan_id = uuid::Uuid::new_v4().to_string();
        let timestamp = now_millis();
        let custom_points = points_to_json(&new_scan.custom_points)?;

        self.conn().execute(
            "INSERT INTO scans (
                id, keyword, business_name, center_lat, center_lng, radius, grid_size,
                shape, custom_points, frequency, status, next_run, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, ?12, ?12)",
            params![
                &scan_id,
                &new_scan.keyword,
                &new_scan.business_name,
                new_scan.center_lat,
                new_scan.center_lng,
                new_scan.radius,
                new_scan.grid_size,
                new_scan.shape.as_str(),
                custom_points,
                new_scan.frequency.as_str(),
                ScanStatus::Pending.as_str(),
                timestamp,
            ],
        )?;

        self.get_scan(&scan_id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_scan(&self, scan_id: &str) -> Result<Option<Scan>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM scans WHERE id = ?1", SCAN_COLUMNS))?;
        stmt.query_row(params![scan_id], scan_from_row).optional()
    }

    /// All scans, most recently created first.
    pub fn list_scans(&self) -> Result<Vec<Scan>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scans ORDER BY created_at DESC, rowid DESC",
            SCAN_COLUMNS
        ))?;
        let scans = stmt
            .query_map([], scan_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(scans)
    }

    /// Apply a partial update. Returns `None` when the scan does not exist.
    /// Geometry changes also drop the scan's rank history.
    pub fn update_scan(&self, scan_id: &str, update: &ScanUpdate) -> Result<Option<Scan>> {
        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(ref keyword) = update.keyword {
            assignments.push("keyword = ?");
            values.push(SqlValue::Text(keyword.clone()));
        }
        if let Some(ref business_name) = update.business_name {
            assignments.push("business_name = ?");
            values.push(business_name.clone().map_or(SqlValue::Null, SqlValue::Text));
        }
        if let Some(lat) = update.center_lat {
            assignments.push("center_lat = ?");
            values.push(SqlValue::Real(lat));
        }
        if let Some(lng) = update.center_lng {
            assignments.push("center_lng = ?");
            values.push(SqlValue::Real(lng));
        }
        if let Some(radius) = update.radius {
            assignments.push("radius = ?");
            values.push(SqlValue::Real(radius));
        }
        if let Some(grid_size) = update.grid_size {
            assignments.push("grid_size = ?");
            values.push(SqlValue::Integer(grid_size));
        }
        if let Some(shape) = update.shape {
            assignments.push("shape = ?");
            values.push(SqlValue::Text(shape.as_str().to_string()));
        }
        if let Some(ref custom_points) = update.custom_points {
            assignments.push("custom_points = ?");
            values.push(points_to_json(custom_points)?.map_or(SqlValue::Null, SqlValue::Text));
        }
        if let Some(frequency) = update.frequency {
            assignments.push("frequency = ?");
            values.push(SqlValue::Text(frequency.as_str().to_string()));
        }
        if let Some(status) = update.status {
            assignments.push("status = ?");
            values.push(SqlValue::Text(status.as_str().to_string()));
        }

        assignments.push("updated_at = ?");
        values.push(SqlValue::Integer(now_millis()));
        values.push(SqlValue::Text(scan_id.to_string()));

        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let changed = tx.execute(
                &format!("UPDATE scans SET {} WHERE id = ?", assignments.join(", ")),
                params_from_iter(values),
            )?;
            if changed == 0 {
                return Ok(None);
            }
            // Ranks are keyed by grid index, which no longer names the same place.
            if update.changes_geometry() {
                let cleared =
                    tx.execute("DELETE FROM rank_history WHERE scan_id = ?1", params![scan_id])?;
                debug!("Cleared {} rank history rows for scan {}", cleared, scan_id);
            }
            tx.commit()?;
        }
        self.get_scan(scan_id)
    }

    /// Delete a scan together with its results, alerts and history.
    pub fn delete_scan(&self, scan_id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM alerts WHERE scan_id = ?1", params![scan_id])?;
        tx.execute("DELETE FROM results WHERE scan_id = ?1", params![scan_id])?;
        tx.execute("DELETE FROM rank_history WHERE scan_id = ?1", params![scan_id])?;
        let deleted = tx.execute("DELETE FROM scans WHERE id = ?1", params![scan_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // Run guard
    /// Atomically move a PENDING scan to RUNNING under a fresh run id.
    /// Returns `None` when the scan is missing or not PENDING.
    pub fn claim_run(&self, scan_id: &str) -> Result<Option<String>> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let timestamp = now_millis();

        let changed = self.conn().execute(
            &format!(
                "UPDATE scans
                 SET status = ?4, run_id = ?2, next_run = NULL, last_run_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND {}",
                Transition::Claim.guard()
            ),
            params![scan_id, &run_id, timestamp, Transition::Claim.target().as_str()],
        )?;

        Ok((changed == 1).then_some(run_id))
    }

    /// Settle a run with one of the transitions that end it. Only applies while
    /// `run_id` still holds the scan in a status the transition may leave, so a
    /// stop or rerun that happened meanwhile is never overwritten.
    pub fn finish_run(
        &self,
        scan_id: &str,
        run_id: &str,
        transition: Transition,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let changed = self.conn().execute(
            &format!(
                "UPDATE scans SET status = ?3, next_run = ?4, updated_at = ?5
                 WHERE id = ?1 AND run_id = ?2 AND {}",
                transition.guard()
            ),
            params![
                scan_id,
                run_id,
                transition.target().as_str(),
                next_run.map(|t| t.timestamp_millis()),
                now_millis(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Whether `run_id` still holds the scan in RUNNING. Another process may
    /// have stopped or reset the scan without reaching this run's token.
    pub fn run_is_live(&self, scan_id: &str, run_id: &str) -> Result<bool> {
        let live: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM scans WHERE id = ?1 AND run_id = ?2 AND status = ?3",
                params![scan_id, run_id, ScanStatus::Running.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(live.is_some())
    }

    pub fn mark_stopped(&self, scan_id: &str) -> Result<Option<Scan>> {
        let changed = self.conn().execute(
            &format!(
                "UPDATE scans SET status = ?3, next_run = NULL, updated_at = ?2
                 WHERE id = ?1 AND {}",
                Transition::Stop.guard()
            ),
            params![scan_id, now_millis(), Transition::Stop.target().as_str()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_scan(scan_id)
    }

    /// Clear results and alerts and return the scan to PENDING, in one transaction.
    /// Rank history is kept so the next run still has a baseline.
    pub fn reset_for_rerun(&self, scan_id: &str) -> Result<Option<ResetSummary>> {
        let (results_deleted, alerts_deleted) = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;

            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM scans WHERE id = ?1", params![scan_id], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            let alerts_deleted =
                tx.execute("DELETE FROM alerts WHERE scan_id = ?1", params![scan_id])?;
            let results_deleted =
                tx.execute("DELETE FROM results WHERE scan_id = ?1", params![scan_id])?;
            tx.execute(
                &format!(
                    "UPDATE scans SET status = ?3, next_run = NULL, run_id = NULL, updated_at = ?2
                     WHERE id = ?1 AND {}",
                    Transition::Reset.guard()
                ),
                params![scan_id, now_millis(), Transition::Reset.target().as_str()],
            )?;
            tx.commit()?;
            (results_deleted, alerts_deleted)
        };

        debug!(
            "Reset scan {}: {} results, {} alerts removed",
            scan_id, results_deleted, alerts_deleted
        );

        let scan = self
            .get_scan(scan_id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        Ok(Some(ResetSummary {
            scan,
            results_deleted,
            alerts_deleted,
        }))
    }

    /// Runs that claimed their scan before `cutoff` and still hold it, as
    /// `(scan_id, run_id)` pairs.
    pub fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<(String, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, run_id FROM scans
             WHERE {} AND run_id IS NOT NULL AND last_run_at < ?1
             ORDER BY last_run_at",
            Transition::Reclaim.guard()
        ))?;
        let runs = stmt
            .query_map(params![cutoff.timestamp_millis()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Return an abandoned run's scan to the queue, due at `next_run`.
    /// Releases the run id so the abandoned run can no longer write.
    pub fn reclaim_run(&self, scan_id: &str, run_id: &str, next_run: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn().execute(
            &format!(
                "UPDATE scans SET status = ?3, run_id = NULL, next_run = ?4, updated_at = ?5
                 WHERE id = ?1 AND run_id = ?2 AND {}",
                Transition::Reclaim.guard()
            ),
            params![
                scan_id,
                run_id,
                Transition::Reclaim.target().as_str(),
                next_run.timestamp_millis(),
                now_millis(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// PENDING scans whose `next_run` has elapsed.
    pub fn due_scans(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM scans
             WHERE status = 'PENDING' AND next_run IS NOT NULL AND next_run <= ?1
             ORDER BY next_run",
        )?;
        let ids = stmt
            .query_map(params![now.timestamp_millis()], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;
        Ok(ids)
    }

    // Result operations
    /// Insert a result for `run_id`. Returns `None` when the run no longer owns the scan.
    pub fn insert_result(
        &self,
        scan_id: &str,
        run_id: &str,
        result: &NewResult,
    ) -> Result<Option<i64>> {
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT INTO results (
                scan_id, run_id, grid_index, lat, lng, rank, vantage, error, payload, checked_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
            WHERE EXISTS (SELECT 1 FROM scans WHERE id = ?1 AND run_id = ?2)",
            params![
                scan_id,
                run_id,
                result.grid_index,
                result.point.lat,
                result.point.lng,
                result.rank,
                &result.vantage,
                &result.error,
                &result.payload,
                result.checked_at.timestamp_millis(),
            ],
        )?;

        Ok((changed == 1).then(|| conn.last_insert_rowid()))
    }

    pub fn get_results(&self, scan_id: &str) -> Result<Vec<RankResult>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, scan_id, run_id, grid_index, lat, lng, rank, vantage, error, payload, checked_at
             FROM results WHERE scan_id = ?1 ORDER BY grid_index, id",
        )?;
        let results = stmt
            .query_map(params![scan_id], result_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(results)
    }

    pub fn count_results(&self, scan_id: &str) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM results WHERE scan_id = ?1",
            params![scan_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // Alert operations
    /// Insert an alert for `run_id`, linked to that run's result at the same grid index.
    pub fn insert_alert(&self, scan_id: &str, run_id: &str, alert: &NewAlert) -> Result<Option<i64>> {
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT INTO alerts (scan_id, result_id, kind, message, previous_rank, current_rank, created_at)
             SELECT ?1,
                    (SELECT id FROM results WHERE scan_id = ?1 AND run_id = ?2 AND grid_index = ?3
                     ORDER BY id DESC LIMIT 1),
                    ?4, ?5, ?6, ?7, ?8
             WHERE EXISTS (SELECT 1 FROM scans WHERE id = ?1 AND run_id = ?2)",
            params![
                scan_id,
                run_id,
                alert.grid_index,
                alert.kind.as_str(),
                &alert.message,
                alert.previous_rank,
                alert.current_rank,
                now_millis(),
            ],
        )?;

        Ok((changed == 1).then(|| conn.last_insert_rowid()))
    }

    pub fn get_alerts(&self, scan_id: &str) -> Result<Vec<Alert>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, scan_id, result_id, kind, message, previous_rank, current_rank, created_at
             FROM alerts WHERE scan_id = ?1 ORDER BY id",
        )?;
        let alerts = stmt
            .query_map(params![scan_id], alert_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(alerts)
    }

    pub fn count_alerts(&self, scan_id: &str) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM alerts WHERE scan_id = ?1",
            params![scan_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // Rank history
    /// Last recorded rank per grid index.
    pub fn rank_history(&self, scan_id: &str) -> Result<HashMap<i64, Option<u32>>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT grid_index, rank FROM rank_history WHERE scan_id = ?1")?;
        let history = stmt
            .query_map(params![scan_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(history)
    }

    /// Upsert history for a run that still owns the scan. Returns whether it was written.
    pub fn record_rank_history(
        &self,
        scan_id: &str,
        run_id: &str,
        ranks: &[(i64, Option<u32>)],
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let owned: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM scans WHERE id = ?1 AND run_id = ?2",
                params![scan_id, run_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Ok(false);
        }

        let timestamp = now_millis();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO rank_history (scan_id, grid_index, rank, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(scan_id, grid_index) DO UPDATE SET rank = excluded.rank,
                     recorded_at = excluded.recorded_at",
            )?;
            for (grid_index, rank) in ranks {
                stmt.execute(params![scan_id, grid_index, rank, timestamp])?;
            }
        }
        tx.commit()?;
        Ok(true)
    }

    // Log stream
    pub fn append_log(
        &self,
        level: LogLevel,
        source: &str,
        message: &str,
        context: &serde_json::Value,
    ) -> Result<i64> {
        let context = if context.is_null() {
            None
        } else {
            Some(context.to_string())
        };
        let conn = self.conn();
        conn.execute(
            "INSERT INTO logs (level, source, message, context, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![level.as_str(), source, message, context, now_millis()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest entries first, filtered by level and/or source.
    pub fn query_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(level) = filter.level {
            clauses.push("level = ?");
            values.push(SqlValue::Text(level.as_str().to_string()));
        }
        if let Some(ref source) = filter.source {
            clauses.push("source = ?");
            values.push(SqlValue::Text(source.clone()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        values.push(SqlValue::Integer(
            filter.limit.unwrap_or(DEFAULT_LOG_LIMIT) as i64,
        ));

        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, level, source, message, context, created_at FROM logs {}
             ORDER BY id DESC LIMIT ?",
            where_clause
        ))?;
        let entries = stmt
            .query_map(params_from_iter(values), log_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn clear_logs(&self) -> Result<usize> {
        self.conn().execute("DELETE FROM logs", [])
    }
}
