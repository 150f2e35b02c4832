// Tests for the request-level service facade

use async_trait::async_trait;
use gridrank_core::model::{LogFilter, LogLevel, ScanStatus, ScanUpdate};
use gridrank_core::{
    CoreError, CreateScanRequest, Database, EngineConfig, Envelope, Orchestrator, ScanService,
};
use gridrank_scanner::error::Result as ScanResult;
use gridrank_scanner::{GeoPoint, ProbeOutcome, ProxyCandidate, RankProbe, RankQuery, Vantage};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct NotListed;

#[async_trait]
impl RankProbe for NotListed {
    async fn probe(&self, _query: &RankQuery, _vantage: &Vantage) -> ScanResult<ProbeOutcome> {
        Ok(ProbeOutcome::not_found(20, Duration::from_millis(3)))
    }
}

fn create_service() -> ScanService {
    let db = Arc::new(Database::in_memory().unwrap());
    let orchestrator = Orchestrator::new(db, Arc::new(NotListed), EngineConfig::default());
    ScanService::new(Arc::new(orchestrator))
}

// ============================================================================
// CRUD Tests
// ============================================================================

#[tokio::test]
async fn test_create_then_fetch() {
    let service = create_service();
    let launched = service
        .create(&CreateScanRequest::new("coffee"))
        .unwrap();
    let summary = launched.run.await.unwrap().unwrap();
    assert_eq!(summary.found, 0);

    let details = service.get(&launched.scan.id).unwrap();
    assert_eq!(details.scan.status, ScanStatus::Completed);
    assert_eq!(details.results.len(), 9);
    assert!(details.results.iter().all(|r| r.rank.is_none() && r.error.is_none()));

    let value = serde_json::to_value(&details).unwrap();
    assert_eq!(value["keyword"], "coffee");
    assert_eq!(value["results"].as_array().unwrap().len(), 9);
}

#[tokio::test]
async fn test_fetch_missing_scan() {
    let service = create_service();
    let envelope: Envelope<_> = service.get("missing").into();
    assert!(!envelope.success);
    assert_eq!(envelope.status, 404);
}

#[tokio::test]
async fn test_create_without_keyword_is_rejected() {
    let service = create_service();
    let err = service
        .create(&CreateScanRequest::new(""))
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(service.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_update_partial_fields() {
    let service = create_service();
    let scan = service.insert(&CreateScanRequest::new("pizza")).unwrap();

    let update: ScanUpdate = serde_json::from_value(json!({
        "radius": 8.0,
        "customPoints": [{"lat": 41.9, "lng": -87.7}],
        "status": "STOPPED"
    }))
    .unwrap();
    let updated = service.update(&scan.id, &update).unwrap();

    assert_eq!(updated.radius, 8.0);
    assert_eq!(updated.custom_points, Some(vec![GeoPoint::new(41.9, -87.7)]));
    assert_eq!(updated.status, ScanStatus::Stopped);
    assert_eq!(updated.keyword, "pizza");

    let cleared: ScanUpdate = serde_json::from_value(json!({"customPoints": null})).unwrap();
    assert_eq!(service.update(&scan.id, &cleared).unwrap().custom_points, None);

    assert!(matches!(
        service.update("missing", &update),
        Err(CoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_delete_removes_scan_and_results() {
    let service = create_service();
    let launched = service.create(&CreateScanRequest::new("pizza")).unwrap();
    launched.run.await.unwrap();

    service.delete(&launched.scan.id).unwrap();
    assert!(service.list().unwrap().is_empty());
    assert_eq!(
        service
            .orchestrator()
            .db()
            .count_results(&launched.scan.id)
            .unwrap(),
        0
    );
    assert!(matches!(
        service.delete(&launched.scan.id),
        Err(CoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_stop_and_list() {
    let service = create_service();
    let first = service.insert(&CreateScanRequest::new("one")).unwrap();
    let second = service.insert(&CreateScanRequest::new("two")).unwrap();

    let stopped = service.stop(&first.id).unwrap();
    assert_eq!(stopped.status, ScanStatus::Stopped);

    let listed = service.list().unwrap();
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[1].status, ScanStatus::Stopped);
}

// ============================================================================
// Proxy and Log Tests
// ============================================================================

#[tokio::test]
async fn test_validate_proxies_one_status_per_candidate() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/generate_204"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&proxy)
        .await;

    let db = Arc::new(Database::in_memory().unwrap());
    let config = EngineConfig::default().with_proxy_test_url("http://connectivity.test/generate_204");
    let service = ScanService::new(Arc::new(Orchestrator::new(
        db,
        Arc::new(NotListed),
        config,
    )));

    let address = proxy.address();
    let candidates = vec![
        ProxyCandidate::new("a", address.ip().to_string(), address.port()),
        ProxyCandidate::new("b", "127.0.0.1", 1),
    ];
    let statuses = service.validate_proxies(candidates, 4).await;

    assert_eq!(statuses.len(), 2);
    let a = statuses.iter().find(|s| s.id == "a").unwrap();
    let b = statuses.iter().find(|s| s.id == "b").unwrap();
    assert!(a.success);
    assert!(!b.success);
    assert!(b.error.is_some());

    let logged = service
        .logs(&LogFilter {
            source: Some("proxy".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].context["reachable"], 1);
}

#[tokio::test]
async fn test_append_query_and_clear_logs() {
    let service = create_service();

    service
        .append_log(LogLevel::Warn, "web", "slow request", json!({"ms": 1200}))
        .unwrap();
    let warnings = service
        .logs(&LogFilter {
            level: Some(LogLevel::Warn),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].source, "web");

    assert!(service.clear_logs().unwrap() >= 1);
    assert!(service.logs(&LogFilter::default()).unwrap().is_empty());
}
