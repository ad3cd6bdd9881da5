//! Voxel snapshot I/O.
//!
//! A snapshot is a flat little-endian integer array of `size * size * depth`
//! cell codes in `z * size * size + y * size + x` order, as produced by the
//! map preprocessing step (walls `1000 + i`, roofs `5000`, corners `10000`,
//! roof corners `10001`, building interiors `20000`, free space below `1000`).

use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::sim::engine::voxel_grid::{VoxelGrid, WALL_CODE};

/// Integer width of one stored cell code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementWidth {
    I16,
    I64,
}

impl ElementWidth {
    pub fn bytes(self) -> usize {
        match self {
            ElementWidth::I16 => 2,
            ElementWidth::I64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotFormat {
    pub width: ElementWidth,
    /// Codes at or above this value are solid.
    pub solid_threshold: i64,
}

impl SnapshotFormat {
    pub fn new(width: ElementWidth) -> Self {
        Self {
            width,
            solid_threshold: WALL_CODE,
        }
    }
}

impl Default for SnapshotFormat {
    fn default() -> Self {
        Self::new(ElementWidth::I16)
    }
}

/// Decodes snapshot bytes into a grid.
pub fn decode_snapshot(
    bytes: &[u8],
    size: usize,
    depth: usize,
    format: SnapshotFormat,
) -> Result<VoxelGrid> {
    let width = format.width.bytes();
    let expected = size * size * depth * width;
    if bytes.len() != expected {
        bail!(
            "snapshot has {} bytes, expected {expected} for {size}x{size}x{depth} {:?} cells",
            bytes.len(),
            format.width
        );
    }

    let codes: Vec<i64> = match format.width {
        ElementWidth::I16 => bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as i64)
            .collect(),
        ElementWidth::I64 => bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
    };

    let grid = VoxelGrid::from_codes(size, depth, &codes, format.solid_threshold)?;
    Ok(grid)
}

/// Encodes a grid as snapshot bytes.
pub fn encode_snapshot(grid: &VoxelGrid, width: ElementWidth) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(grid.len() * width.bytes());
    for cell in grid.cells() {
        let code = cell.to_code();
        match width {
            ElementWidth::I16 => bytes.extend_from_slice(&(code as i16).to_le_bytes()),
            ElementWidth::I64 => bytes.extend_from_slice(&code.to_le_bytes()),
        }
    }
    bytes
}

/// Reads a voxel snapshot file.
pub fn read_snapshot(
    path: &Path,
    size: usize,
    depth: usize,
    format: SnapshotFormat,
) -> Result<VoxelGrid> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut bytes = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;

    decode_snapshot(&bytes, size, depth, format)
        .with_context(|| format!("Failed to decode snapshot: {}", path.display()))
}

/// Writes a voxel snapshot file.
pub fn write_snapshot(path: &Path, grid: &VoxelGrid, width: ElementWidth) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&encode_snapshot(grid, width))
        .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
    writer.flush()?;
    Ok(())
}
