//! JSON requests and results, binary power maps.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::sim::coverage::PowerMap;
use crate::sim::launch::{RayLaunchRequest, RayLaunchResult};

/// Writes a ray-launch result as JSON.
pub fn write_result_json(path: &Path, result: &RayLaunchResult) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer(writer, result)
        .with_context(|| format!("Failed to serialize result to: {}", path.display()))?;

    Ok(())
}

pub fn to_result_string(result: &RayLaunchResult) -> Result<String> {
    serde_json::to_string(result).context("Failed to serialize result to string")
}

/// Reads a ray-launch request from a JSON file.
pub fn read_request_json(path: &Path) -> Result<RayLaunchRequest> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let request: RayLaunchRequest = serde_json::from_reader(reader)
        .with_context(|| format!("Failed to deserialize request from: {}", path.display()))?;

    Ok(request)
}

pub fn from_request_string(json: &str) -> Result<RayLaunchRequest> {
    serde_json::from_str(json).context("Failed to deserialize request from string")
}

/// Writes a power map as flat little-endian `f32`.
pub fn write_power_map_binary(path: &Path, map: &PowerMap) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    map.write_binary(BufWriter::new(file))
        .with_context(|| format!("Failed to write power map to: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;
    use crate::sim::engine::voxel_grid::VoxelGrid;
    use crate::sim::launch::compute_ray_launch;
    use tempfile::tempdir;

    fn small_request() -> RayLaunchRequest {
        let mut request = RayLaunchRequest::new(Point::new(3.0, 3.0, 1.0), 8);
        request.number_of_rays_azimuth = 8;
        request.number_of_rays_elevation = 4;
        request
    }

    #[test]
    fn test_request_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("request.json");
        let expected = small_request();
        std::fs::write(&path, serde_json::to_string(&expected)?)?;

        let loaded = read_request_json(&path)?;
        assert_eq!(loaded, expected);

        let from_str = from_request_string(&serde_json::to_string(&expected)?)?;
        assert_eq!(from_str, expected);
        Ok(())
    }

    #[test]
    fn test_write_result_and_binary() -> Result<()> {
        let dir = tempdir()?;
        let grid = VoxelGrid::new(8, 3);
        let result = compute_ray_launch(&grid, small_request())?;

        let json_path = dir.path().join("result.json");
        write_result_json(&json_path, &result)?;
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json_path)?)?;
        assert_eq!(value["powerMap"].as_array().map(|a| a.len()), Some(3));
        assert!(value["powerMapLegend"]["2"].is_object());
        assert!(to_result_string(&result)?.starts_with('{'));

        let bin_path = dir.path().join("power.bin");
        write_power_map_binary(&bin_path, &result.power_map)?;
        assert_eq!(std::fs::metadata(&bin_path)?.len(), 8 * 8 * 3 * 4);
        Ok(())
    }

    #[test]
    fn test_malformed_request() {
        assert!(from_request_string("{\"size\": 10}").is_err());
    }
}
