use std::collections::HashSet;
use std::fs;
use std::path::Path;

use geo::{LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::density;
use crate::errors::{AppError, AppResult};

/// A named borough polygon in British National Grid metres.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    pub expected_count: u32,
}

impl Region {
    pub fn new(name: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        let name = name.into();
        let expected_count = density::expected_count(&name);
        Self {
            name,
            geometry,
            expected_count,
        }
    }
}

#[derive(Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    crs: Option<NamedCrs>,
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct NamedCrs {
    properties: NamedCrsProperties,
}

#[derive(Deserialize)]
struct NamedCrsProperties {
    name: String,
}

#[derive(Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    #[serde(default)]
    geometry: Option<RawGeometry>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawGeometry {
    Polygon {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Vec<f64>>>>,
    },
    #[serde(other)]
    Unsupported,
}

pub fn load_regions(path: &Path, name_field: &str) -> AppResult<Vec<Region>> {
    let text = fs::read_to_string(path)?;
    let regions = parse_regions(&text, name_field)?;
    debug!(path = %path.display(), count = regions.len(), "loaded region polygons");
    Ok(regions)
}

/// Parses a GeoJSON `FeatureCollection` whose coordinates are already in
/// EPSG:27700. Dataset order is preserved; the first feature with a given name
/// wins.
pub fn parse_regions(text: &str, name_field: &str) -> AppResult<Vec<Region>> {
    let collection: FeatureCollection = serde_json::from_str(text)?;
    if let Some(crs) = &collection.crs {
        ensure_projected_crs(&crs.properties.name)?;
    }

    let mut seen = HashSet::new();
    let mut regions = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        let Some(name) = feature_name(feature.properties.as_ref(), name_field) else {
            warn!(index, field = name_field, "skipping feature without a region name");
            continue;
        };
        let geometry = match feature.geometry {
            Some(RawGeometry::Polygon { coordinates }) => {
                MultiPolygon::new(vec![build_polygon(&coordinates)?])
            }
            Some(RawGeometry::MultiPolygon { coordinates }) => MultiPolygon::new(
                coordinates
                    .iter()
                    .map(|rings| build_polygon(rings))
                    .collect::<AppResult<Vec<_>>>()?,
            ),
            Some(RawGeometry::Unsupported) | None => {
                warn!(region = %name, "skipping feature without polygon geometry");
                continue;
            }
        };
        if !seen.insert(name.clone()) {
            warn!(region = %name, "skipping duplicate region name");
            continue;
        }
        regions.push(Region::new(name, geometry));
    }
    Ok(regions)
}

fn ensure_projected_crs(name: &str) -> AppResult<()> {
    if name.contains("27700") {
        return Ok(());
    }
    Err(AppError::Config(format!(
        "region polygons must be in EPSG:27700 (British National Grid), found {name}"
    )))
}

fn feature_name(properties: Option<&Map<String, Value>>, name_field: &str) -> Option<String> {
    properties?
        .get(name_field)?
        .as_str()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn build_polygon(rings: &[Vec<Vec<f64>>]) -> AppResult<Polygon<f64>> {
    let mut rings = rings.iter().map(|ring| build_ring(ring));
    let exterior = rings
        .next()
        .ok_or_else(|| AppError::Parse("polygon has no exterior ring".into()))??;
    let interiors = rings.collect::<AppResult<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn build_ring(positions: &[Vec<f64>]) -> AppResult<LineString<f64>> {
    positions
        .iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Ok((*x, *y)),
            _ => Err(AppError::Parse(format!(
                "position needs at least two ordinates, got {}",
                position.len()
            ))),
        })
        .collect::<AppResult<Vec<_>>>()
        .map(LineString::from)
}

#[cfg(test)]
mod tests {
    use geo::{Area, Contains, Point};

    use super::*;

    const SAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::27700" } },
        "features": [
            {
                "type": "Feature",
                "properties": { "NAME": "Camden", "GSS_CODE": "E09000007" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0, 0], [100, 0], [100, 100], [0, 100], [0, 0]],
                                    [[40, 40], [60, 40], [60, 60], [40, 60], [40, 40]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "NAME": "Testborough" },
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[0, 0, 5], [10, 0, 5], [10, 10, 5], [0, 10, 5], [0, 0, 5]]],
                        [[[20, 20], [30, 20], [30, 30], [20, 30], [20, 20]]]
                    ]
                }
            },
            {
                "type": "Feature",
                "properties": { "NAME": "Centroid" },
                "geometry": { "type": "Point", "coordinates": [1, 2] }
            },
            {
                "type": "Feature",
                "properties": { "CODE": "nameless" },
                "geometry": { "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]] }
            },
            {
                "type": "Feature",
                "properties": { "NAME": "Camden" },
                "geometry": { "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]] }
            }
        ]
    }"#;

    #[test]
    fn parses_polygons_in_dataset_order() {
        let regions = parse_regions(SAMPLE, "NAME").unwrap();
        let names: Vec<&str> = regions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Camden", "Testborough"]);

        let camden = &regions[0];
        assert_eq!(camden.expected_count, 245);
        assert_eq!(camden.geometry.unsigned_area(), 10_000.0 - 400.0);
        assert!(!camden.geometry.contains(&Point::new(50.0, 50.0)));

        let other = &regions[1];
        assert_eq!(other.expected_count, density::DEFAULT_EXPECTED_COUNT);
        assert_eq!(other.geometry.0.len(), 2);
    }

    #[test]
    fn honours_custom_name_field() {
        let regions = parse_regions(SAMPLE, "CODE").unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "nameless");
    }

    #[test]
    fn rejects_geographic_crs() {
        let text = r#"{
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" } },
            "features": []
        }"#;
        assert!(matches!(
            parse_regions(text, "NAME"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn rejects_short_positions() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "NAME": "Broken" },
                "geometry": { "type": "Polygon", "coordinates": [[[0], [1, 0], [1, 1], [0, 0]]] }
            }]
        }"#;
        assert!(matches!(parse_regions(text, "NAME"), Err(AppError::Parse(_))));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boroughs.geojson");
        std::fs::write(&path, SAMPLE).unwrap();
        let regions = load_regions(&path, "NAME").unwrap();
        assert_eq!(regions.len(), 2);
    }
}
