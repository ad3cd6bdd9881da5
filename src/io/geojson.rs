//! Building footprints from GeoJSON feature collections.
//!
//! Each `Polygon` feature becomes one [`Footprint`] whose vertices are
//! `[lon, lat]` pairs taken from the outer ring, ready for
//! [`GridBuilder::add_geo_footprint`](crate::sim::engine::buildings::GridBuilder::add_geo_footprint).
//! The name comes from `addr:housename`, the height from `building:levels`.

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::GeometryWarning;
use crate::geom::footprint::Footprint;

/// Storey height used to turn `building:levels` into meters.
pub const LEVEL_HEIGHT_M: f64 = 3.0;
/// Levels assumed when a feature does not say.
pub const DEFAULT_LEVELS: f64 = 3.0;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

/// Reads building footprints from a GeoJSON file.
pub fn read_geojson_footprints(path: &Path) -> Result<Vec<Footprint>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let collection: FeatureCollection = serde_json::from_reader(reader)
        .with_context(|| format!("Failed to deserialize GeoJSON from: {}", path.display()))?;

    collect_footprints(collection)
        .with_context(|| format!("Invalid building geometry in: {}", path.display()))
}

pub fn footprints_from_geojson(json: &str) -> Result<Vec<Footprint>> {
    let collection: FeatureCollection =
        serde_json::from_str(json).context("Failed to deserialize GeoJSON from string")?;
    collect_footprints(collection)
}

fn collect_footprints(collection: FeatureCollection) -> Result<Vec<Footprint>> {
    let mut footprints = Vec::with_capacity(collection.features.len());
    for (i, feature) in collection.features.into_iter().enumerate() {
        let properties = feature.properties.unwrap_or_default();
        let name = building_name(&properties, i + 1);
        let height = levels(&properties) * LEVEL_HEIGHT_M;

        let Some(geometry) = feature.geometry else {
            warn!(
                "{}",
                GeometryWarning::UnsupportedGeometry {
                    name,
                    kind: "missing".to_string(),
                }
            );
            continue;
        };
        if geometry.kind != "Polygon" {
            warn!(
                "{}",
                GeometryWarning::UnsupportedGeometry {
                    name,
                    kind: geometry.kind,
                }
            );
            continue;
        }

        let rings: Vec<Vec<Vec<f64>>> = serde_json::from_value(geometry.coordinates)
            .with_context(|| format!("Bad polygon coordinates for '{name}'"))?;
        // Holes are ignored, buildings are filled solid.
        let vertices = rings
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|position| match position.as_slice() {
                [lon, lat, ..] => Some([*lon, *lat]),
                _ => None,
            })
            .collect();

        footprints.push(Footprint::new(&name, vertices, height));
    }
    Ok(footprints)
}

/// `addr:housename`, or `Building N` counting features from 1.
fn building_name(properties: &Map<String, Value>, number: usize) -> String {
    match properties.get("addr:housename") {
        Some(Value::String(name)) => name.clone(),
        Some(Value::Null) | None => format!("Building {number}"),
        Some(other) => other.to_string(),
    }
}

/// `building:levels` as a number or a string starting with one.
fn levels(properties: &Map<String, Value>) -> f64 {
    let parsed = match properties.get("building:levels") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s
            .split_whitespace()
            .next()
            .and_then(|token| token.parse::<f64>().ok()),
        _ => None,
    };
    parsed.filter(|l| l.is_finite()).unwrap_or(DEFAULT_LEVELS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::engine::buildings::GridBuilder;
    use crate::sim::engine::voxel_grid::{Cell, GeoBounds};
    use tempfile::tempdir;

    const CITY: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"addr:housename": "Library", "building:levels": 4},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.1, 0.1], [0.4, 0.1], [0.4, 0.3], [0.1, 0.3], [0.1, 0.1]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"building:levels": "2"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.6, 0.6], [0.9, 0.6], [0.9, 0.9], [0.6, 0.9], [0.6, 0.6]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"building:levels": "many"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.1, 0.6, 12.0], [0.3, 0.6, 12.0], [0.2, 0.8, 12.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"addr:housename": "Kiosk"},
                "geometry": {"type": "Point", "coordinates": [0.5, 0.5]}
            }
        ]
    }"#;

    #[test]
    fn test_read_feature_collection() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("rawBuildings.json");
        std::fs::write(&path, CITY)?;

        let footprints = read_geojson_footprints(&path)?;
        assert_eq!(footprints.len(), 3);

        assert_eq!(footprints[0].name, "Library");
        assert_eq!(footprints[0].height, 12.0);
        assert_eq!(footprints[0].vertices.len(), 5);
        assert_eq!(footprints[0].vertices[1], [0.4, 0.1]);

        assert_eq!(footprints[1].name, "Building 2");
        assert_eq!(footprints[1].height, 6.0);

        // Unparseable levels fall back to the default, altitudes are dropped
        assert_eq!(footprints[2].name, "Building 3");
        assert_eq!(footprints[2].height, DEFAULT_LEVELS * LEVEL_HEIGHT_M);
        assert_eq!(footprints[2].vertices[0], [0.1, 0.6]);
        Ok(())
    }

    #[test]
    fn test_footprints_build_a_grid() -> Result<()> {
        let footprints = footprints_from_geojson(CITY)?;
        let bounds = GeoBounds::new(0.0, 1.0, 0.0, 1.0);
        let mut builder = GridBuilder::new(21, 10, 1.0).with_bounds(bounds);
        for footprint in &footprints {
            builder.add_geo_footprint(footprint);
        }
        assert!(builder.warnings().is_empty());
        let grid = builder.build();

        // Library: lon 0.1..0.4 -> x 2.5..8.5, twelve layers clamped to ten
        assert_eq!(grid.cell(5, 2, 9), Some(Cell::Edge));
        assert_eq!(grid.cell(5, 4, 9), Some(Cell::Wall));
        assert_eq!(grid.cell(5, 4, 0), Some(Cell::Interior));
        // Second building is six layers high
        assert_eq!(grid.cell(15, 15, 5).map(Cell::is_solid), Some(true));
        assert_eq!(grid.cell(15, 15, 6), Some(Cell::Free));
        // Open ground between them
        assert_eq!(grid.cell(10, 10, 0), Some(Cell::Free));
        Ok(())
    }

    #[test]
    fn test_malformed_geojson() {
        assert!(footprints_from_geojson("{\"features\": 3}").is_err());
        let bad_ring = r#"{"features": [{"properties": {},
            "geometry": {"type": "Polygon", "coordinates": [["x"]]}}]}"#;
        assert!(footprints_from_geojson(bad_ring).is_err());
        assert!(read_geojson_footprints(Path::new("/nonexistent/buildings.json")).is_err());
    }
}
