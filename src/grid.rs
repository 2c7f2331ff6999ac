use geo::{BoundingRect, Contains, Coord, MultiPolygon, Point};
use serde::Serialize;

use crate::errors::{AppError, AppResult};
use crate::projection::Reproject;

/// A search origin in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplePoint {
    pub lat: f64,
    pub lng: f64,
}

impl SamplePoint {
    /// Formats the point the way the Places `location` parameter expects.
    pub fn as_location(&self) -> String {
        format!("{},{}", self.lat, self.lng)
    }
}

/// Samples `geometry` on a square lattice anchored at the bounding box's
/// lower-left corner.
///
/// Points are visited column by column (x ascending, then y ascending); only
/// those strictly inside the geometry are reprojected and returned, so the
/// output order is stable for a given geometry and spacing.
pub fn generate_grid(
    geometry: &MultiPolygon<f64>,
    spacing: f64,
    projection: &dyn Reproject,
) -> AppResult<Vec<SamplePoint>> {
    if !spacing.is_finite() || spacing <= 0.0 {
        return Err(AppError::Geometry(format!(
            "grid spacing must be a positive number, got {spacing}"
        )));
    }

    let Some(bounds) = geometry.bounding_rect() else {
        return Ok(Vec::new());
    };
    let (min, max) = (bounds.min(), bounds.max());

    let mut points = Vec::new();
    for x in axis_steps(min.x, max.x, spacing) {
        for y in axis_steps(min.y, max.y, spacing) {
            let candidate = Coord { x, y };
            if geometry.contains(&Point::from(candidate)) {
                points.push(projection.to_geographic(candidate));
            }
        }
    }
    Ok(points)
}

fn axis_steps(start: f64, end: f64, spacing: f64) -> impl Iterator<Item = f64> {
    (0_u64..)
        .map(move |step| start + spacing * step as f64)
        .take_while(move |value| *value <= end)
}
