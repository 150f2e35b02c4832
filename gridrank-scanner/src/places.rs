// Point-of-interest lookup backing SMART grids

use crate::error::{Result, ScanError};
use crate::geo::GeoPoint;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Supplies sample coordinates for an area instead of a regular lattice.
#[async_trait]
pub trait PointSource: Send + Sync {
    async fn points(
        &self,
        center: GeoPoint,
        radius_km: f64,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<GeoPoint>>;
}

/// A fixed list of points. Useful when the caller already resolved them.
#[derive(Debug, Clone, Default)]
pub struct StaticPointSource {
    points: Vec<GeoPoint>,
}

impl StaticPointSource {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self { points }
    }
}

#[async_trait]
impl PointSource for StaticPointSource {
    async fn points(
        &self,
        _center: GeoPoint,
        _radius_km: f64,
        _keyword: &str,
        limit: usize,
    ) -> Result<Vec<GeoPoint>> {
        Ok(self.points.iter().copied().take(limit).collect())
    }
}

/// Queries a places endpoint with `q`, `lat`, `lng`, `radius_km` and `limit`.
///
/// Accepts a bare array or `{"places": [...]}`; each entry needs
/// `lat`/`latitude` and `lng`/`lon`/`longitude`.
#[derive(Debug, Clone)]
pub struct HttpPointSource {
    endpoint: Url,
    client: Client,
}

impl HttpPointSource {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
        let client = Client::builder()
            .user_agent("gridrank/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl PointSource for HttpPointSource {
    async fn points(
        &self,
        center: GeoPoint,
        radius_km: f64,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<GeoPoint>> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("q", keyword.to_string()),
                ("lat", center.lat.to_string()),
                ("lng", center.lng.to_string()),
                ("radius_km", radius_km.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        let points = parse_points(&body)?;
        debug!("Point source returned {} points around {}", points.len(), center);
        Ok(points.into_iter().take(limit).collect())
    }
}

pub fn parse_points(body: &Value) -> Result<Vec<GeoPoint>> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(map) => map
            .get("places")
            .and_then(Value::as_array)
            .ok_or_else(|| ScanError::ParseError("response has no places array".to_string()))?,
        _ => return Err(ScanError::ParseError("unexpected places payload".to_string())),
    };

    let coordinate = |entry: &Value, keys: &[&str]| {
        keys.iter()
            .find_map(|key| entry.get(*key).and_then(Value::as_f64))
    };

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let lat = coordinate(entry, &["lat", "latitude"])?;
            let lng = coordinate(entry, &["lng", "lon", "longitude"])?;
            Some(GeoPoint::new(lat, lng)).filter(GeoPoint::is_finite)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, query_param},
    };

    #[test]
    fn test_parse_points_accepts_key_variants() {
        let body = json!({"places": [
            {"lat": 1.0, "lng": 2.0},
            {"latitude": 3.0, "longitude": 4.0},
            {"lat": 5.0, "lon": 6.0},
            {"name": "no coordinates"}
        ]});

        let points = parse_points(&body).unwrap();
        assert_eq!(
            points,
            vec![
                GeoPoint::new(1.0, 2.0),
                GeoPoint::new(3.0, 4.0),
                GeoPoint::new(5.0, 6.0)
            ]
        );
    }

    #[test]
    fn test_parse_points_rejects_scalar() {
        assert!(parse_points(&json!("nope")).is_err());
    }

    #[tokio::test]
    async fn test_static_source_respects_limit() {
        let source = StaticPointSource::new(vec![
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(2.0, 2.0),
            GeoPoint::new(3.0, 3.0),
        ]);
        let points = source
            .points(GeoPoint::new(0.0, 0.0), 5.0, "pizza", 2)
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
    }

    #[tokio::test]
    async fn test_http_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "coffee"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"lat": 41.88, "lng": -87.63},
                {"lat": 41.89, "lng": -87.62}
            ])))
            .mount(&server)
            .await;

        let source = HttpPointSource::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let points = source
            .points(GeoPoint::new(41.8781, -87.6298), 3.0, "coffee", 10)
            .await
            .unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0], GeoPoint::new(41.88, -87.63));
    }
}
