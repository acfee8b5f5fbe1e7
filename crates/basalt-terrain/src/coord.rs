//! Page and sub-page grid coordinates

use basalt_core::ONE_METER;

/// An integer (x, z) coordinate identifying a page or sub-page cell.
///
/// The coordinate is tagged with the cell size it was constructed with;
/// two `PageCoord`s are only comparable when their cell sizes match.
/// Distances are Chebyshev (max of the per-axis deltas), matching how
/// the LOD policy bands terrain by "rings" around the camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageCoord {
    pub x: i64,
    pub z: i64,
    cell_size_m: i64,
}

impl PageCoord {
    /// Create a coordinate directly from cell indices.
    pub fn new(x: i64, z: i64, cell_size_m: i64) -> Self {
        debug_assert!(cell_size_m > 0);
        Self { x, z, cell_size_m }
    }

    /// Create the coordinate of the cell containing a world position
    /// (fixed-point millimeters). Cells are half-open: a position exactly
    /// on a boundary belongs to the cell on its positive side.
    pub fn from_world(x_mm: i64, z_mm: i64, cell_size_m: i64) -> Self {
        debug_assert!(cell_size_m > 0);
        let cell_mm = cell_size_m * ONE_METER;
        Self {
            x: x_mm.div_euclid(cell_mm),
            z: z_mm.div_euclid(cell_mm),
            cell_size_m,
        }
    }

    /// Cell size in meters.
    pub fn cell_size_m(&self) -> i64 {
        self.cell_size_m
    }

    /// Chebyshev distance to another coordinate, in cells.
    pub fn distance(&self, other: &PageCoord) -> i64 {
        debug_assert_eq!(self.cell_size_m, other.cell_size_m);
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }

    /// Per-axis cell delta `self - other`.
    pub fn delta(&self, other: &PageCoord) -> (i64, i64) {
        debug_assert_eq!(self.cell_size_m, other.cell_size_m);
        (self.x - other.x, self.z - other.z)
    }

    /// World-space origin of this cell in millimeters.
    pub fn world_origin(&self) -> (i64, i64) {
        let cell_mm = self.cell_size_m * ONE_METER;
        (self.x * cell_mm, self.z * cell_mm)
    }
}
