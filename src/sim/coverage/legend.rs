use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::sim::engine::propagation::NO_SIGNAL_DBM;
use crate::sim::engine::voxel_grid::VoxelGrid;

use super::power_map::PowerMap;

pub const NUM_BANDS: usize = 8;

/// Width of one legend band in dB.
pub const BAND_WIDTH_DB: f64 = 20.0;

pub const BAND_LABELS: [&str; NUM_BANDS] = [
    "< 0dbm",
    "< -20dbm",
    "< -40dbm",
    "< -60dbm",
    "< -80dbm",
    "< -100dbm",
    "< -120dbm",
    "< -140dbm",
];

/// Band of a power value: band `k` holds `(-20(k+1), -20k]`.
pub fn band_index(power_dbm: f64) -> usize {
    if power_dbm > -BAND_WIDTH_DB {
        return 0;
    }
    let k = (-power_dbm / BAND_WIDTH_DB).floor();
    if k.is_finite() {
        (k as usize).min(NUM_BANDS - 1)
    } else {
        NUM_BANDS - 1
    }
}

/// Coverage statistics of one height layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerLegend {
    /// Percentage of non-wall voxels above the minimal ray power.
    pub total: f64,
    /// Percentage of non-wall voxels per band.
    pub bands: [f64; NUM_BANDS],
    pub counts: [usize; NUM_BANDS],
    pub covered: usize,
    pub non_wall: usize,
}

impl LayerLegend {
    fn finish(&mut self) {
        if self.non_wall == 0 {
            return;
        }
        let n = self.non_wall as f64;
        self.total = self.covered as f64 / n * 100.0;
        for (pct, &count) in self.bands.iter_mut().zip(&self.counts) {
            *pct = count as f64 / n * 100.0;
        }
    }
}

impl Serialize for LayerLegend {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_BANDS + 1))?;
        for (label, pct) in BAND_LABELS.iter().zip(&self.bands) {
            map.serialize_entry(label, pct)?;
        }
        map.serialize_entry("total", &self.total)?;
        map.end()
    }
}

/// Per-layer coverage legend, keyed by layer index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PowerMapLegend {
    pub layers: BTreeMap<usize, LayerLegend>,
}

impl PowerMapLegend {
    pub fn from_power_map(map: &PowerMap, grid: &VoxelGrid, minimal_power_dbm: f64) -> Self {
        let mut layers = BTreeMap::new();
        for (z, layer) in map.values().outer_iter().enumerate() {
            let mut entry = LayerLegend::default();
            for ((y, x), &power) in layer.indexed_iter() {
                if grid.is_solid(x as i64, y as i64, z as i64) == Some(true) {
                    continue;
                }
                entry.non_wall += 1;
                entry.counts[band_index(power)] += 1;
                if power > minimal_power_dbm && power > NO_SIGNAL_DBM {
                    entry.covered += 1;
                }
            }
            entry.finish();
            layers.insert(z, entry);
        }
        Self { layers }
    }

    pub fn layer(&self, z: usize) -> Option<&LayerLegend> {
        self.layers.get(&z)
    }
}

impl Serialize for PowerMapLegend {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.layers.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::engine::tracer::RaySample;
    use crate::sim::engine::voxel_grid::Cell;

    #[test]
    fn test_band_boundaries() {
        assert_eq!(band_index(12.0), 0);
        assert_eq!(band_index(-19.9), 0);
        assert_eq!(band_index(-20.0), 1);
        assert_eq!(band_index(-39.9), 1);
        assert_eq!(band_index(-40.0), 2);
        assert_eq!(band_index(-139.0), 6);
        assert_eq!(band_index(-140.0), 7);
        assert_eq!(band_index(NO_SIGNAL_DBM), 7);
        assert_eq!(band_index(f64::NEG_INFINITY), 7);
    }

    #[test]
    fn test_legend_excludes_walls_and_sums_to_100() {
        let mut grid = VoxelGrid::new(4, 2);
        grid.set(0, 0, 0, Cell::Wall);
        grid.set(1, 0, 0, Cell::Edge);
        let mut map = PowerMap::for_grid(&grid);
        map.record(&RaySample { x: 2, y: 0, z: 0, power: -10.0 });
        map.record(&RaySample { x: 3, y: 0, z: 0, power: -65.0 });
        map.record(&RaySample { x: 3, y: 3, z: 1, power: -150.0 });

        let legend = PowerMapLegend::from_power_map(&map, &grid, -160.0);
        let l0 = legend.layer(0).unwrap();
        assert_eq!(l0.non_wall, 14);
        assert_eq!(l0.covered, 2);
        assert_eq!(l0.counts[0], 1);
        assert_eq!(l0.counts[3], 1);
        assert_eq!(l0.counts[7], 12);
        assert!((l0.total - 2.0 / 14.0 * 100.0).abs() < 1e-9);

        for entry in legend.layers.values() {
            let sum: f64 = entry.bands.iter().sum();
            assert!((sum - 100.0).abs() < 1e-9);
        }
        // Covered counts only powers above the configured minimum
        let strict = PowerMapLegend::from_power_map(&map, &grid, -100.0);
        assert_eq!(strict.layer(1).unwrap().covered, 0);
    }

    #[test]
    fn test_fully_solid_layer() {
        let grid = VoxelGrid::solid(2, 1);
        let map = PowerMap::for_grid(&grid);
        let legend = PowerMapLegend::from_power_map(&map, &grid, -160.0);
        let l0 = legend.layer(0).unwrap();
        assert_eq!(l0.non_wall, 0);
        assert_eq!(l0.total, 0.0);
    }

    #[test]
    fn test_legend_json_keys() {
        let grid = VoxelGrid::new(2, 1);
        let map = PowerMap::for_grid(&grid);
        let legend = PowerMapLegend::from_power_map(&map, &grid, -160.0);
        let json = serde_json::to_value(&legend).unwrap();
        assert_eq!(json["0"]["total"], 0.0);
        assert_eq!(json["0"]["< -140dbm"], 100.0);
        assert_eq!(json["0"].as_object().unwrap().len(), NUM_BANDS + 1);
    }
}
