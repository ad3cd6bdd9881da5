use std::io::Write;

use ndarray::{Array3, ArrayView1, ArrayView2, Zip};
use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::sim::engine::propagation::NO_SIGNAL_DBM;
use crate::sim::engine::tracer::{Ray, RaySample};
use crate::sim::engine::voxel_grid::VoxelGrid;

/// Strongest received power per voxel, in dBm.
///
/// Indexed `[z, y, x]`. Unreached voxels and walls hold [`NO_SIGNAL_DBM`].
#[derive(Debug, Clone, PartialEq)]
pub struct PowerMap {
    values: Array3<f64>,
}

impl PowerMap {
    pub fn new(size: usize, depth: usize) -> Self {
        Self {
            values: Array3::from_elem((depth, size, size), NO_SIGNAL_DBM),
        }
    }

    pub fn for_grid(grid: &VoxelGrid) -> Self {
        Self::new(grid.size(), grid.depth())
    }

    /// Rebuilds a map from a set of rays. The result depends only on the set.
    pub fn aggregate<'a>(
        grid: &VoxelGrid,
        station: Option<((usize, usize, usize), f64)>,
        rays: impl IntoIterator<Item = &'a Ray>,
    ) -> Self {
        let mut map = Self::for_grid(grid);
        for ray in rays {
            map.record_ray(ray);
        }
        if let Some((voxel, power)) = station {
            map.set_station(voxel, power);
        }
        map
    }

    pub fn size(&self) -> usize {
        self.values.dim().1
    }

    pub fn depth(&self) -> usize {
        self.values.dim().0
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f64> {
        self.values.get((z, y, x)).copied()
    }

    /// Keeps the larger of the stored and sampled power. Wall samples are ignored.
    pub fn record(&mut self, sample: &RaySample) -> bool {
        if sample.is_wall() || !sample.power.is_finite() {
            return false;
        }
        match self.values.get_mut((sample.z, sample.y, sample.x)) {
            Some(v) if sample.power > *v => {
                *v = sample.power;
                true
            }
            _ => false,
        }
    }

    pub fn record_ray(&mut self, ray: &Ray) {
        for sample in &ray.samples {
            self.record(sample);
        }
    }

    pub fn set_station(&mut self, (x, y, z): (usize, usize, usize), power_dbm: f64) {
        if let Some(v) = self.values.get_mut((z, y, x)) {
            *v = power_dbm;
        }
    }

    /// Element-wise max with another map.
    ///
    /// # Panics
    /// If the two maps differ in shape.
    pub fn merge(&mut self, other: &PowerMap) {
        Zip::from(&mut self.values)
            .and(&other.values)
            .for_each(|a, &b| *a = a.max(b));
    }

    /// Number of voxels holding more than the no-signal value.
    pub fn reached_count(&self) -> usize {
        self.values.iter().filter(|&&v| v > NO_SIGNAL_DBM).count()
    }

    /// Writes the map as flat little-endian `f32`, `z * size * size + y * size + x` order.
    pub fn write_binary<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for &v in self.values.iter() {
            writer.write_all(&(v as f32).to_le_bytes())?;
        }
        writer.flush()
    }
}

// Nested `[z][y][x]` arrays.
impl Serialize for PowerMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.depth()))?;
        for layer in self.values.outer_iter() {
            seq.serialize_element(&Layer(layer))?;
        }
        seq.end()
    }
}

struct Layer<'a>(ArrayView2<'a, f64>);

impl Serialize for Layer<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.nrows()))?;
        for row in self.0.outer_iter() {
            seq.serialize_element(&Row(row))?;
        }
        seq.end()
    }
}

struct Row<'a>(ArrayView1<'a, f64>);

impl Serialize for Row<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}
