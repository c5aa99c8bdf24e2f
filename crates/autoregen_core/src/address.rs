//! # Addressing
//!
//! Volumes are grouped into regions (chunks) of 16x16 columns.
//! Exclusions are evaluated per region, restores per cell.

use std::fmt;
use std::sync::Arc;

/// Region bit-size: a cell belongs to region `(x >> REGION_BITS, z >> REGION_BITS)`.
pub const REGION_BITS: u32 = 4;

/// Region width/depth in cells.
pub const REGION_SIZE: i32 = 1 << REGION_BITS;

/// Name of a managed volume (a "world").
///
/// Cheap to clone; shared between the scheduler, the store and log lines.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeId(Arc<str>);

impl VolumeId {
    /// Creates a volume id from its name.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the volume name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VolumeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for VolumeId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Address of a single cell (a "block") in world coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    /// X coordinate (in cells).
    pub x: i32,
    /// Y level.
    pub y: i32,
    /// Z coordinate (in cells).
    pub z: i32,
}

impl CellAddress {
    /// Creates a new cell address.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the region that owns this cell.
    #[inline]
    #[must_use]
    pub const fn region(self) -> RegionCoord {
        RegionCoord::from_cell_pos(self.x, self.z)
    }
}

/// Region coordinate (identifies a chunk in the volume grid).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionCoord {
    /// X coordinate (in regions, not cells).
    pub x: i32,
    /// Z coordinate (in regions, not cells).
    pub z: i32,
}

impl RegionCoord {
    /// Creates a new region coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Converts cell coordinates to the owning region.
    ///
    /// Arithmetic shift, so negative coordinates floor toward negative
    /// infinity (`-1 -> -1`, `-16 -> -1`, `-17 -> -2`).
    #[inline]
    #[must_use]
    pub const fn from_cell_pos(cell_x: i32, cell_z: i32) -> Self {
        Self {
            x: cell_x >> REGION_BITS,
            z: cell_z >> REGION_BITS,
        }
    }
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.x, self.z)
    }
}
