// Tests for database functionality

use chrono::{Duration, Utc};
use gridrank_core::data::Database;
use gridrank_core::lifecycle::Transition;
use gridrank_core::model::{
    AlertKind, Frequency, LogFilter, LogLevel, NewAlert, NewResult, NewScan, ScanStatus,
    ScanUpdate, ShapeKind,
};
use gridrank_scanner::GeoPoint;
use serde_json::json;
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn new_scan(keyword: &str) -> NewScan {
    NewScan {
        keyword: keyword.to_string(),
        business_name: Some("Lou Malnati's".to_string()),
        center_lat: 41.8781,
        center_lng: -87.6298,
        radius: 5.0,
        grid_size: 3,
        shape: ShapeKind::Square,
        custom_points: None,
        frequency: Frequency::Once,
    }
}

fn new_result(grid_index: i64, rank: Option<u32>) -> NewResult {
    NewResult {
        grid_index,
        point: GeoPoint::new(41.8781, -87.6298),
        rank,
        vantage: "direct".to_string(),
        error: None,
        payload: None,
        checked_at: Utc::now(),
    }
}

fn new_alert(grid_index: i64) -> NewAlert {
    NewAlert {
        grid_index,
        kind: AlertKind::RankDrop,
        message: "Rank dropped".to_string(),
        previous_rank: Some(1),
        current_rank: Some(6),
    }
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path);
    assert!(db.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_database_exists_and_drop() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    assert!(!Database::exists(&db_path));
    let db = Database::new(&db_path).unwrap();
    assert!(Database::exists(&db_path));

    std::mem::drop(db);
    Database::drop(&db_path).unwrap();
    assert!(!Database::exists(&db_path));
}

#[test]
fn test_reopen_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let id = {
        let db = Database::new(&db_path).unwrap();
        db.insert_scan(&new_scan("pizza")).unwrap().id
    };

    let db = Database::new(&db_path).unwrap();
    assert_eq!(db.get_scan(&id).unwrap().unwrap().keyword, "pizza");
}

// ============================================================================
// Scan Tests
// ============================================================================

#[test]
fn test_insert_and_get_scan() {
    let (_temp_dir, db) = create_test_db();

    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    assert!(!scan.id.is_empty());
    assert_eq!(scan.status, ScanStatus::Pending);
    assert!(scan.next_run.is_none());
    assert!(scan.run_id.is_none());

    let fetched = db.get_scan(&scan.id).unwrap().unwrap();
    assert_eq!(fetched, scan);
}

#[test]
fn test_get_missing_scan() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.get_scan("missing").unwrap().is_none());
}

#[test]
fn test_custom_points_round_trip() {
    let (_temp_dir, db) = create_test_db();
    let points = vec![GeoPoint::new(41.9, -87.7), GeoPoint::new(41.8, -87.6)];

    let mut custom = new_scan("tacos");
    custom.shape = ShapeKind::Custom;
    custom.custom_points = Some(points.clone());

    let scan = db.insert_scan(&custom).unwrap();
    assert_eq!(scan.custom_points, Some(points));
}

#[test]
fn test_list_scans_newest_first() {
    let (_temp_dir, db) = create_test_db();

    let first = db.insert_scan(&new_scan("one")).unwrap();
    let second = db.insert_scan(&new_scan("two")).unwrap();
    let third = db.insert_scan(&new_scan("three")).unwrap();

    let ids: Vec<String> = db.list_scans().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![third.id, second.id, first.id]);
}

#[test]
fn test_partial_update() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();

    let update = ScanUpdate {
        keyword: Some("deep dish".to_string()),
        business_name: Some(None),
        grid_size: Some(5),
        ..Default::default()
    };
    let updated = db.update_scan(&scan.id, &update).unwrap().unwrap();

    assert_eq!(updated.keyword, "deep dish");
    assert_eq!(updated.business_name, None);
    assert_eq!(updated.grid_size, 5);
    assert_eq!(updated.radius, scan.radius);
    assert!(updated.updated_at >= scan.updated_at);
}

#[test]
fn test_geometry_update_clears_rank_history() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    let run_id = db.claim_run(&scan.id).unwrap().unwrap();
    db.record_rank_history(&scan.id, &run_id, &[(0, Some(1)), (1, Some(4))])
        .unwrap();

    // Keyword and frequency leave the points where they were
    let update = ScanUpdate {
        keyword: Some("deep dish".to_string()),
        frequency: Some(Frequency::Daily),
        ..Default::default()
    };
    db.update_scan(&scan.id, &update).unwrap().unwrap();
    assert_eq!(db.rank_history(&scan.id).unwrap().len(), 2);

    let update = ScanUpdate {
        center_lat: Some(41.95),
        ..Default::default()
    };
    let moved = db.update_scan(&scan.id, &update).unwrap().unwrap();
    assert_eq!(moved.center_lat, 41.95);
    assert!(db.rank_history(&scan.id).unwrap().is_empty());

    db.record_rank_history(&scan.id, &run_id, &[(0, Some(2))])
        .unwrap();
    let update = ScanUpdate {
        custom_points: Some(Some(vec![GeoPoint::new(41.9, -87.7)])),
        ..Default::default()
    };
    db.update_scan(&scan.id, &update).unwrap().unwrap();
    assert!(db.rank_history(&scan.id).unwrap().is_empty());
}

#[test]
fn test_update_missing_scan() {
    let (_temp_dir, db) = create_test_db();
    let update = ScanUpdate {
        radius: Some(2.0),
        ..Default::default()
    };
    assert!(db.update_scan("missing", &update).unwrap().is_none());
}

#[test]
fn test_delete_scan_removes_children() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    let run_id = db.claim_run(&scan.id).unwrap().unwrap();

    db.insert_result(&scan.id, &run_id, &new_result(0, Some(1)))
        .unwrap()
        .unwrap();
    db.insert_alert(&scan.id, &run_id, &new_alert(0))
        .unwrap()
        .unwrap();
    db.record_rank_history(&scan.id, &run_id, &[(0, Some(1))])
        .unwrap();

    assert!(db.delete_scan(&scan.id).unwrap());
    assert!(db.get_scan(&scan.id).unwrap().is_none());
    assert_eq!(db.count_results(&scan.id).unwrap(), 0);
    assert_eq!(db.count_alerts(&scan.id).unwrap(), 0);
    assert!(db.rank_history(&scan.id).unwrap().is_empty());

    assert!(!db.delete_scan(&scan.id).unwrap());
}

// ============================================================================
// Run Guard Tests
// ============================================================================

#[test]
fn test_claim_only_from_pending() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();

    let run_id = db.claim_run(&scan.id).unwrap();
    assert!(run_id.is_some());
    assert!(db.claim_run(&scan.id).unwrap().is_none());

    let claimed = db.get_scan(&scan.id).unwrap().unwrap();
    assert_eq!(claimed.status, ScanStatus::Running);
    assert!(claimed.last_run_at.is_some());
}

#[test]
fn test_finish_requires_matching_run() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    let run_id = db.claim_run(&scan.id).unwrap().unwrap();

    assert!(
        !db.finish_run(&scan.id, "other-run", Transition::Complete, None)
            .unwrap()
    );
    assert!(
        db.finish_run(&scan.id, &run_id, Transition::Complete, None)
            .unwrap()
    );
    // Already settled
    assert!(
        !db.finish_run(&scan.id, &run_id, Transition::Fail, None)
            .unwrap()
    );
    assert_eq!(
        db.get_scan(&scan.id).unwrap().unwrap().status,
        ScanStatus::Completed
    );
}

#[test]
fn test_results_rejected_for_stale_run() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    let stale = db.claim_run(&scan.id).unwrap().unwrap();

    db.reset_for_rerun(&scan.id).unwrap().unwrap();
    let fresh = db.claim_run(&scan.id).unwrap().unwrap();

    assert!(
        db.insert_result(&scan.id, &stale, &new_result(0, Some(1)))
            .unwrap()
            .is_none()
    );
    assert!(
        db.insert_alert(&scan.id, &stale, &new_alert(0))
            .unwrap()
            .is_none()
    );
    assert!(
        !db.record_rank_history(&scan.id, &stale, &[(0, Some(1))])
            .unwrap()
    );

    assert!(
        db.insert_result(&scan.id, &fresh, &new_result(0, Some(2)))
            .unwrap()
            .is_some()
    );
    let results = db.get_results(&scan.id).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].run_id, fresh);
}

#[test]
fn test_results_kept_after_stop() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    let run_id = db.claim_run(&scan.id).unwrap().unwrap();

    db.insert_result(&scan.id, &run_id, &new_result(0, Some(3)))
        .unwrap()
        .unwrap();
    let stopped = db.mark_stopped(&scan.id).unwrap().unwrap();

    assert_eq!(stopped.status, ScanStatus::Stopped);
    assert!(stopped.next_run.is_none());
    assert_eq!(db.count_results(&scan.id).unwrap(), 1);
    assert!(
        !db.finish_run(&scan.id, &run_id, Transition::Complete, None)
            .unwrap()
    );
}

#[test]
fn test_reset_for_rerun() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    let run_id = db.claim_run(&scan.id).unwrap().unwrap();

    for index in 0..9 {
        db.insert_result(&scan.id, &run_id, &new_result(index, Some(2)))
            .unwrap()
            .unwrap();
    }
    db.insert_alert(&scan.id, &run_id, &new_alert(0))
        .unwrap()
        .unwrap();
    db.insert_alert(&scan.id, &run_id, &new_alert(1))
        .unwrap()
        .unwrap();
    db.record_rank_history(&scan.id, &run_id, &[(0, Some(2))])
        .unwrap();
    db.finish_run(
        &scan.id,
        &run_id,
        Transition::Reschedule,
        Some(Utc::now() + Duration::days(1)),
    )
    .unwrap();

    let summary = db.reset_for_rerun(&scan.id).unwrap().unwrap();
    assert_eq!(summary.results_deleted, 9);
    assert_eq!(summary.alerts_deleted, 2);
    assert_eq!(summary.scan.status, ScanStatus::Pending);
    assert!(summary.scan.next_run.is_none());
    assert!(summary.scan.run_id.is_none());

    assert_eq!(db.count_results(&scan.id).unwrap(), 0);
    assert_eq!(db.count_alerts(&scan.id).unwrap(), 0);
    // History is the baseline for the next run
    assert_eq!(db.rank_history(&scan.id).unwrap().get(&0), Some(&Some(2)));

    let again = db.reset_for_rerun(&scan.id).unwrap().unwrap();
    assert_eq!(again.results_deleted, 0);
    assert_eq!(again.alerts_deleted, 0);

    assert!(db.reset_for_rerun("missing").unwrap().is_none());
}

#[test]
fn test_due_scans() {
    let (_temp_dir, db) = create_test_db();
    let now = Utc::now();

    let due = db.insert_scan(&new_scan("due")).unwrap();
    let later = db.insert_scan(&new_scan("later")).unwrap();
    let unscheduled = db.insert_scan(&new_scan("unscheduled")).unwrap();

    for (scan_id, next_run) in [
        (&due.id, now - Duration::minutes(5)),
        (&later.id, now + Duration::hours(1)),
    ] {
        let run_id = db.claim_run(scan_id).unwrap().unwrap();
        db.finish_run(scan_id, &run_id, Transition::Reschedule, Some(next_run))
            .unwrap();
    }

    assert_eq!(db.due_scans(now).unwrap(), vec![due.id.clone()]);
    assert!(!db.due_scans(now).unwrap().contains(&unscheduled.id));

    db.mark_stopped(&due.id).unwrap();
    assert!(db.due_scans(now).unwrap().is_empty());
}

#[test]
fn test_reclaim_stale_run() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    let fresh = db.insert_scan(&new_scan("fresh")).unwrap();
    let stopped = db.insert_scan(&new_scan("stopped")).unwrap();

    let run_id = db.claim_run(&scan.id).unwrap().unwrap();
    db.claim_run(&fresh.id).unwrap().unwrap();
    db.claim_run(&stopped.id).unwrap().unwrap();
    db.mark_stopped(&stopped.id).unwrap();

    let now = Utc::now();
    assert!(db.stale_runs(now - Duration::hours(1)).unwrap().is_empty());

    // Everything claimed so far is older than a cutoff in the future
    let stale = db.stale_runs(now + Duration::seconds(1)).unwrap();
    assert_eq!(stale.len(), 2);
    assert!(stale.contains(&(scan.id.clone(), run_id.clone())));
    assert!(!stale.iter().any(|(id, _)| id == &stopped.id));

    assert!(!db.reclaim_run(&scan.id, "other-run", now).unwrap());
    assert!(db.reclaim_run(&scan.id, &run_id, now).unwrap());
    assert!(!db.reclaim_run(&scan.id, &run_id, now).unwrap());

    let reclaimed = db.get_scan(&scan.id).unwrap().unwrap();
    assert_eq!(reclaimed.status, ScanStatus::Pending);
    assert!(reclaimed.run_id.is_none());
    assert_eq!(db.due_scans(now).unwrap(), vec![scan.id.clone()]);

    // The abandoned run can no longer write
    assert!(
        db.insert_result(&scan.id, &run_id, &new_result(0, Some(1)))
            .unwrap()
            .is_none()
    );
    assert!(!db.run_is_live(&scan.id, &run_id).unwrap());
}

#[test]
fn test_run_is_live() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    let run_id = db.claim_run(&scan.id).unwrap().unwrap();

    assert!(db.run_is_live(&scan.id, &run_id).unwrap());
    assert!(!db.run_is_live(&scan.id, "other-run").unwrap());
    assert!(!db.run_is_live("missing", &run_id).unwrap());

    // Stop keeps the run id but the run no longer holds a RUNNING scan
    db.mark_stopped(&scan.id).unwrap();
    assert!(!db.run_is_live(&scan.id, &run_id).unwrap());
}

// ============================================================================
// Alert and History Tests
// ============================================================================

#[test]
fn test_alert_links_to_result() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    let run_id = db.claim_run(&scan.id).unwrap().unwrap();

    let result_id = db
        .insert_result(&scan.id, &run_id, &new_result(4, Some(6)))
        .unwrap()
        .unwrap();
    db.insert_alert(&scan.id, &run_id, &new_alert(4))
        .unwrap()
        .unwrap();
    db.insert_alert(&scan.id, &run_id, &new_alert(7))
        .unwrap()
        .unwrap();

    let alerts = db.get_alerts(&scan.id).unwrap();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].result_id, Some(result_id));
    assert_eq!(alerts[0].kind, AlertKind::RankDrop);
    assert_eq!(alerts[1].result_id, None);
}

#[test]
fn test_rank_history_upsert() {
    let (_temp_dir, db) = create_test_db();
    let scan = db.insert_scan(&new_scan("pizza")).unwrap();
    let run_id = db.claim_run(&scan.id).unwrap().unwrap();

    db.record_rank_history(&scan.id, &run_id, &[(0, Some(4)), (1, None)])
        .unwrap();
    db.record_rank_history(&scan.id, &run_id, &[(0, Some(2))])
        .unwrap();

    let history = db.rank_history(&scan.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[&0], Some(2));
    assert_eq!(history[&1], None);
}

// ============================================================================
// Log Tests
// ============================================================================

#[test]
fn test_logs_filter_and_limit() {
    let (_temp_dir, db) = create_test_db();

    db.append_log(LogLevel::Info, "orchestrator", "started", &json!({"n": 1}))
        .unwrap();
    db.append_log(LogLevel::Error, "orchestrator", "failed", &json!({"n": 2}))
        .unwrap();
    db.append_log(LogLevel::Info, "proxy", "validated", &serde_json::Value::Null)
        .unwrap();

    let infos = db
        .query_logs(&LogFilter {
            level: Some(LogLevel::Info),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].source, "proxy");

    let orchestrator = db
        .query_logs(&LogFilter {
            source: Some("orchestrator".to_string()),
            limit: Some(1),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(orchestrator.len(), 1);
    assert_eq!(orchestrator[0].message, "failed");
    assert_eq!(orchestrator[0].context["n"], 2);

    assert_eq!(db.clear_logs().unwrap(), 3);
    assert!(db.query_logs(&LogFilter::default()).unwrap().is_empty());
}
