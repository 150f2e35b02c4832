use chrono::Utc;
use gridrank::handlers::*;
use gridrank_core::report::ReportFormat;
use gridrank_core::{CreateScanRequest, Frequency, Scan, ScanDetails, ScanStatus, ShapeKind};
use gridrank_scanner::{GeoPoint, ProxyStatus};
use std::io::Write;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

fn scan(id: &str, keyword: &str) -> Scan {
    let now = Utc::now();
    Scan {
        id: id.to_string(),
        keyword: keyword.to_string(),
        business_name: None,
        center_lat: 41.8781,
        center_lng: -87.6298,
        radius: 5.0,
        grid_size: 3,
        shape: ShapeKind::Square,
        custom_points: None,
        frequency: Frequency::Once,
        status: ScanStatus::Pending,
        next_run: None,
        run_id: None,
        last_run_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn test_data_dir_resolve() {
    let dir = DataDir::resolve("/tmp/gridrank-test");
    assert_eq!(dir.config_path, dir.root.join("config.json"));
    assert_eq!(dir.db_path, dir.root.join("gridrank.db"));

    let home = DataDir::resolve("~/.config/gridrank/");
    assert!(!home.root.to_string_lossy().starts_with('~'));
}

#[test]
fn test_parse_point_line() {
    assert_eq!(
        parse_point_line(" 41.9, -87.7 "),
        Some(GeoPoint::new(41.9, -87.7))
    );
    assert_eq!(parse_point_line("91.0,0.0"), None);
    assert_eq!(parse_point_line("41.9"), None);
    assert_eq!(parse_point_line("north,west"), None);
}

#[test]
fn test_load_points_from_lines() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(temp_file, "41.90,-87.70")?;
    writeln!(temp_file)?; // Empty line
    writeln!(temp_file, "not a point")?;
    writeln!(temp_file, "41.85,-87.60")?;

    let points = load_points_from_file(temp_file.path())?;
    assert_eq!(
        points,
        vec![GeoPoint::new(41.90, -87.70), GeoPoint::new(41.85, -87.60)]
    );
    Ok(())
}

#[test]
fn test_load_points_from_json() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    write!(temp_file, r#"[{{"lat": 40.7, "lng": -74.0}}]"#)?;

    let points = load_points_from_file(temp_file.path())?;
    assert_eq!(points, vec![GeoPoint::new(40.7, -74.0)]);
    Ok(())
}

#[test]
fn test_load_points_from_file_empty() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "   ").unwrap();

    let result = load_points_from_file(temp_file.path());
    assert!(result.unwrap_err().contains("No valid points"));
}

#[test]
fn test_load_proxies_from_lines() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(temp_file, "# residential pool")?;
    writeln!(temp_file, "10.0.0.1:8080")?;
    writeln!(temp_file, "10.0.0.2:3128:alice:secret")?;
    writeln!(temp_file, "missing-port")?;

    let proxies = load_proxies_from_file(temp_file.path())?;
    assert_eq!(proxies.len(), 2);
    assert_eq!(proxies[0].to_string(), "10.0.0.1:8080");
    assert_eq!(proxies[1].username.as_deref(), Some("alice"));
    assert_ne!(proxies[0].id, proxies[1].id);
    Ok(())
}

#[test]
fn test_load_proxies_from_json() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    write!(
        temp_file,
        r#"[{{"id": "p1", "host": "10.0.0.1", "port": 8080}}]"#
    )?;

    let proxies = load_proxies_from_file(temp_file.path())?;
    assert_eq!(proxies.len(), 1);
    assert_eq!(proxies[0].id, "p1");
    Ok(())
}

#[test]
fn test_load_proxies_missing_file() {
    let result = load_proxies_from_file(std::path::Path::new("/nonexistent/proxies.txt"));
    assert!(result.unwrap_err().contains("Failed to read proxy file"));
}

#[test]
fn test_format_scan_table() {
    let mut custom = scan("b", "coffee");
    custom.custom_points = Some(vec![GeoPoint::new(1.0, 1.0), GeoPoint::new(2.0, 2.0)]);
    let table = format_scan_table(&[scan("a", "pizza"), custom]);

    assert!(table.contains("KEYWORD"));
    assert!(table.contains("pizza"));
    assert!(table.contains("3x3"));
    assert!(table.contains("2 pts"));

    assert!(format_scan_table(&[]).contains("No scans yet"));
}

#[test]
fn test_format_proxy_report() {
    let statuses = vec![
        ProxyStatus::reachable(
            "a".to_string(),
            "10.0.0.1".to_string(),
            8080,
            Duration::from_millis(42),
        ),
        ProxyStatus::failed(
            "b".to_string(),
            "10.0.0.2".to_string(),
            8080,
            "TIMEOUT".to_string(),
        ),
    ];

    let report = format_proxy_report(&statuses);
    assert!(report.contains("10.0.0.1:8080"));
    assert!(report.contains("42ms"));
    assert!(report.contains("TIMEOUT"));
    assert!(report.contains("1 of 2 proxies reachable"));
}

#[test]
fn test_render_details_formats() -> Result<(), Box<dyn std::error::Error>> {
    let details = ScanDetails {
        scan: scan("a", "pizza"),
        results: vec![],
        alerts: vec![],
    };

    let text = render_details(&details, ReportFormat::Text)?;
    assert!(text.contains("GRIDRANK SCAN REPORT"));

    let json = render_details(&details, ReportFormat::Json)?;
    let value: serde_json::Value = serde_json::from_str(&json)?;
    assert_eq!(value["report"]["scan"]["id"], "a");
    Ok(())
}

#[test]
fn test_initialize_then_open_service() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path().join("gridrank");
    let dir = DataDir::resolve(root.to_str().ok_or("non-utf8 temp path")?);

    initialize_data_dir(&dir)?;
    assert!(dir.config_path.exists());
    assert!(dir.db_path.exists());

    let service = open_service(&dir)?;
    let stored = service.insert(&CreateScanRequest::new("pizza"))?;
    assert_eq!(service.list()?.len(), 1);

    // Re-initializing wipes the database
    drop(service);
    initialize_data_dir(&dir)?;
    let service = open_service(&dir)?;
    assert!(service.list()?.is_empty());
    assert!(service.get(&stored.id).is_err());
    Ok(())
}
