// Sample-point generation around a scan center

use crate::model::{Scan, ScanShape, ShapeKind};
use gridrank_scanner::GeoPoint;

/// Kilometres per degree of latitude (WGS84 mean).
const KM_PER_DEG_LAT: f64 = 110.574;
/// Kilometres per degree of longitude at the equator.
const KM_PER_DEG_LNG: f64 = 111.320;
/// Floor for cos(latitude) so longitude offsets stay finite near the poles.
const MIN_LAT_COS: f64 = 0.01;
/// Upper bound on points per axis.
pub const MAX_GRID_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        const EPS: f64 = 1e-9;
        point.lat >= self.min_lat - EPS
            && point.lat <= self.max_lat + EPS
            && point.lng >= self.min_lng - EPS
            && point.lng <= self.max_lng + EPS
    }
}

/// Degree offsets covering `radius_km` at `lat`.
fn degree_offsets(lat: f64, radius_km: f64) -> (f64, f64) {
    let lat_cos = lat.to_radians().cos().abs().max(MIN_LAT_COS);
    (
        radius_km / KM_PER_DEG_LAT,
        radius_km / (KM_PER_DEG_LNG * lat_cos),
    )
}

/// The square of half-width `radius_km` around the center, in degrees.
pub fn bounding_box(center_lat: f64, center_lng: f64, radius_km: f64) -> BoundingBox {
    let radius_km = if radius_km.is_finite() { radius_km.max(0.0) } else { 0.0 };
    let (dlat, dlng) = degree_offsets(center_lat, radius_km);
    BoundingBox {
        min_lat: (center_lat - dlat).max(-90.0),
        max_lat: (center_lat + dlat).min(90.0),
        min_lng: center_lng - dlng,
        max_lng: center_lng + dlng,
    }
}

/// Generate the ordered sample points for a scan.
///
/// SQUARE (and CUSTOM, whose explicit points are applied by the caller) yields a
/// `grid_size × grid_size` lattice in row-major order, north-west first, spread
/// evenly across the bounding square. SMART yields nothing: its points come from
/// a point source. Degenerate input (`grid_size <= 0`, `radius <= 0`, non-finite
/// radius) collapses to the center.
pub fn generate_grid(
    center_lat: f64,
    center_lng: f64,
    radius: f64,
    grid_size: i64,
    shape: ShapeKind,
) -> Vec<GeoPoint> {
    if shape == ShapeKind::Smart {
        return Vec::new();
    }

    let center = GeoPoint::new(center_lat, center_lng);
    if grid_size <= 1 || !radius.is_finite() || radius <= 0.0 {
        return vec![center];
    }

    let n = grid_size.min(MAX_GRID_SIZE) as usize;
    let (dlat, dlng) = degree_offsets(center_lat, radius);
    let span = (n - 1) as f64;

    let mut points = Vec::with_capacity(n * n);
    for row in 0..n {
        // +1 at the northern edge, -1 at the southern edge
        let fy = 1.0 - 2.0 * row as f64 / span;
        let lat = (center_lat + fy * dlat).clamp(-90.0, 90.0);
        for col in 0..n {
            let fx = -1.0 + 2.0 * col as f64 / span;
            points.push(GeoPoint::new(lat, center_lng + fx * dlng));
        }
    }
    points
}

/// Points a scan probes without consulting an external source.
/// Returns `None` for SMART scans.
pub fn planned_points(scan: &Scan) -> Option<Vec<GeoPoint>> {
    match scan.layout() {
        ScanShape::Smart => None,
        ScanShape::Custom(points) => Some(points),
        ScanShape::Square => Some(generate_grid(
            scan.center_lat,
            scan.center_lng,
            scan.radius,
            scan.grid_size,
            scan.shape,
        )),
    }
}
