use chrono::{DateTime, Duration, Utc};
use gridrank_scanner::GeoPoint;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ScanStatus {
    pub const ALL: [ScanStatus; 5] = [
        ScanStatus::Pending,
        ScanStatus::Running,
        ScanStatus::Completed,
        ScanStatus::Failed,
        ScanStatus::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "PENDING",
            ScanStatus::Running => "RUNNING",
            ScanStatus::Completed => "COMPLETED",
            ScanStatus::Failed => "FAILED",
            ScanStatus::Stopped => "STOPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Some(ScanStatus::Pending),
            "RUNNING" => Some(ScanStatus::Running),
            "COMPLETED" => Some(ScanStatus::Completed),
            "FAILED" => Some(ScanStatus::Failed),
            "STOPPED" => Some(ScanStatus::Stopped),
            _ => None,
        }
    }
}

/// How sample points are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShapeKind {
    Square,
    Smart,
    Custom,
}

impl ShapeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeKind::Square => "SQUARE",
            ShapeKind::Smart => "SMART",
            ShapeKind::Custom => "CUSTOM",
        }
    }

    /// Unknown names fall back to `Square`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "SMART" => ShapeKind::Smart,
            "CUSTOM" => ShapeKind::Custom,
            _ => ShapeKind::Square,
        }
    }
}

/// Point layout of a scan after applying custom-point precedence.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanShape {
    Square,
    Custom(Vec<GeoPoint>),
    Smart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Once => "ONCE",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        }
    }

    /// Unknown names fall back to `Once`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "DAILY" => Frequency::Daily,
            "WEEKLY" => Frequency::Weekly,
            "MONTHLY" => Frequency::Monthly,
            _ => Frequency::Once,
        }
    }

    pub fn cadence(&self) -> Option<Duration> {
        match self {
            Frequency::Once => None,
            Frequency::Daily => Some(Duration::days(1)),
            Frequency::Weekly => Some(Duration::days(7)),
            Frequency::Monthly => Some(Duration::days(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: String,
    pub keyword: String,
    pub business_name: Option<String>,
    pub center_lat: f64,
    pub center_lng: f64,
    pub radius: f64,
    pub grid_size: i64,
    pub shape: ShapeKind,
    pub custom_points: Option<Vec<GeoPoint>>,
    pub frequency: Frequency,
    pub status: ScanStatus,
    pub next_run: Option<DateTime<Utc>>,
    pub run_id: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scan {
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.center_lat, self.center_lng)
    }

    /// Custom points win unless the scan is SMART.
    pub fn layout(&self) -> ScanShape {
        match (&self.shape, &self.custom_points) {
            (ShapeKind::Smart, _) => ScanShape::Smart,
            (_, Some(points)) if !points.is_empty() => ScanShape::Custom(points.clone()),
            _ => ScanShape::Square,
        }
    }
}

/// Fully defaulted values for a new scan row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScan {
    pub keyword: String,
    pub business_name: Option<String>,
    pub center_lat: f64,
    pub center_lng: f64,
    pub radius: f64,
    pub grid_size: i64,
    pub shape: ShapeKind,
    pub custom_points: Option<Vec<GeoPoint>>,
    pub frequency: Frequency,
}

/// Partial update. `custom_points: Some(None)` clears the stored points.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanUpdate {
    pub keyword: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub business_name: Option<Option<String>>,
    #[serde(alias = "lat")]
    pub center_lat: Option<f64>,
    #[serde(alias = "lng")]
    pub center_lng: Option<f64>,
    pub radius: Option<f64>,
    pub grid_size: Option<i64>,
    pub shape: Option<ShapeKind>,
    #[serde(default, deserialize_with = "double_option")]
    pub custom_points: Option<Option<Vec<GeoPoint>>>,
    pub frequency: Option<Frequency>,
    pub status: Option<ScanStatus>,
}

impl ScanUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ScanUpdate::default()
    }

    /// Whether the update can move grid points, making stored ranks incomparable.
    pub fn changes_geometry(&self) -> bool {
        self.center_lat.is_some()
            || self.center_lng.is_some()
            || self.radius.is_some()
            || self.grid_size.is_some()
            || self.shape.is_some()
            || self.custom_points.is_some()
    }
}

// Distinguishes an explicit `null` from an absent field.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// One ranking observation for one grid point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankResult {
    pub id: i64,
    pub scan_id: String,
    pub run_id: String,
    pub grid_index: i64,
    pub lat: f64,
    pub lng: f64,
    pub rank: Option<u32>,
    pub vantage: String,
    pub error: Option<String>,
    pub payload: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewResult {
    pub grid_index: i64,
    pub point: GeoPoint,
    pub rank: Option<u32>,
    pub vantage: String,
    pub error: Option<String>,
    pub payload: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    RankDrop,
    RankGain,
    LostVisibility,
    NewVisibility,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::RankDrop => "RANK_DROP",
            AlertKind::RankGain => "RANK_GAIN",
            AlertKind::LostVisibility => "LOST_VISIBILITY",
            AlertKind::NewVisibility => "NEW_VISIBILITY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RANK_DROP" => Some(AlertKind::RankDrop),
            "RANK_GAIN" => Some(AlertKind::RankGain),
            "LOST_VISIBILITY" => Some(AlertKind::LostVisibility),
            "NEW_VISIBILITY" => Some(AlertKind::NewVisibility),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub scan_id: String,
    pub result_id: Option<i64>,
    pub kind: AlertKind,
    pub message: String,
    pub previous_rank: Option<u32>,
    pub current_rank: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    /// Links the alert to this run's result for the same grid point.
    pub grid_index: i64,
    pub kind: AlertKind,
    pub message: String,
    pub previous_rank: Option<u32>,
    pub current_rank: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub source: Option<String>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(shape: ShapeKind, custom_points: Option<Vec<GeoPoint>>) -> Scan {
        let now = Utc::now();
        Scan {
            id: "s1".to_string(),
            keyword: "pizza".to_string(),
            business_name: None,
            center_lat: 41.8781,
            center_lng: -87.6298,
            radius: 5.0,
            grid_size: 3,
            shape,
            custom_points,
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
    fn test_layout_precedence() {
        let points = vec![GeoPoint::new(1.0, 2.0)];

        assert_eq!(scan(ShapeKind::Square, None).layout(), ScanShape::Square);
        assert_eq!(
            scan(ShapeKind::Square, Some(points.clone())).layout(),
            ScanShape::Custom(points.clone())
        );
        assert_eq!(
            scan(ShapeKind::Custom, Some(points.clone())).layout(),
            ScanShape::Custom(points.clone())
        );
        assert_eq!(scan(ShapeKind::Smart, Some(points)).layout(), ScanShape::Smart);
        assert_eq!(scan(ShapeKind::Custom, Some(vec![])).layout(), ScanShape::Square);
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(ShapeKind::parse_lenient("smart"), ShapeKind::Smart);
        assert_eq!(ShapeKind::parse_lenient("hexagon"), ShapeKind::Square);
        assert_eq!(Frequency::parse_lenient(" weekly "), Frequency::Weekly);
        assert_eq!(Frequency::parse_lenient("sometimes"), Frequency::Once);
        assert_eq!(ScanStatus::parse("stopped"), Some(ScanStatus::Stopped));
        assert_eq!(ScanStatus::parse("paused"), None);
    }

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let cleared: ScanUpdate = serde_json::from_str(r#"{"customPoints": null}"#).unwrap();
        assert_eq!(cleared.custom_points, Some(None));

        let untouched: ScanUpdate = serde_json::from_str(r#"{"keyword": "tacos"}"#).unwrap();
        assert_eq!(untouched.custom_points, None);
        assert_eq!(untouched.keyword.as_deref(), Some("tacos"));
        assert!(ScanUpdate::default().is_empty());
    }

    #[test]
    fn test_scan_serializes_camel_case() {
        let value = serde_json::to_value(scan(ShapeKind::Square, None)).unwrap();
        assert_eq!(value["centerLat"], 41.8781);
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["shape"], "SQUARE");
        assert!(value["nextRun"].is_null());
    }
}
