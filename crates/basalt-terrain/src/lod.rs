//! LOD policy: how sample density falls off with distance from the camera

use crate::config::TerrainConfig;

/// The pluggable LOD policy the terrain core consults.
///
/// The core treats this as a black-box monotonic-with-distance function.
/// Implementations must be *continuous*: the meters-per-sample of two
/// adjacent tiles may never differ by more than one doubling/halving
/// step. The core debug-asserts this but does not enforce it; a policy
/// that violates it is a configuration bug upstream.
pub trait LodSpec {
    /// Page size in meters.
    fn page_size(&self) -> i64;

    /// Number of page rings around the camera page that stay resident.
    fn visible_page_radius(&self) -> i64;

    /// Tiles (patches) per page edge for a page at the given Chebyshev
    /// page distance from the camera. Must divide `page_size`.
    fn tiles_per_page(&self, pages_from_camera: i64) -> i64;

    /// Required meters-per-sample for terrain at the given world position
    /// and camera distance (in pages and in sub-pages). Must be a power
    /// of two within the configured [min, max] range.
    fn meters_per_sample(
        &self,
        x_mm: i64,
        z_mm: i64,
        pages_from_camera: i64,
        sub_pages_from_camera: i64,
    ) -> i64;
}

/// The stock distance-banded policy.
///
/// Detail halves every time the sub-page distance from the camera
/// doubles, so adjacent cells differ by at most one step.
pub struct DefaultLodSpec {
    page_size: i64,
    visible_page_radius: i64,
    min_mps: i64,
    max_mps: i64,
    /// Tiles per page edge for the camera page and its immediate ring
    pub near_tiles: i64,
    /// Tiles per page edge for pages further out
    pub far_tiles: i64,
}

impl DefaultLodSpec {
    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            page_size: config.page_size,
            visible_page_radius: config.visible_page_radius,
            min_mps: config.min_meters_per_sample,
            max_mps: config.max_meters_per_sample,
            near_tiles: 8,
            far_tiles: 4,
        }
    }
}

impl LodSpec for DefaultLodSpec {
    fn page_size(&self) -> i64 {
        self.page_size
    }

    fn visible_page_radius(&self) -> i64 {
        self.visible_page_radius
    }

    fn tiles_per_page(&self, pages_from_camera: i64) -> i64 {
        if pages_from_camera <= 1 {
            self.near_tiles
        } else {
            self.far_tiles
        }
    }

    fn meters_per_sample(
        &self,
        _x_mm: i64,
        _z_mm: i64,
        _pages_from_camera: i64,
        sub_pages_from_camera: i64,
    ) -> i64 {
        let mut mps = self.min_mps;
        let mut d = sub_pages_from_camera;
        while d >= 2 && mps < self.max_mps {
            mps *= 2;
            d /= 2;
        }
        mps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> DefaultLodSpec {
        DefaultLodSpec::new(&TerrainConfig::default())
    }

    #[test]
    fn detail_is_monotonic_with_distance() {
        let s = spec();
        let mut last = 0;
        for d in 0..64 {
            let mps = s.meters_per_sample(0, 0, 0, d);
            assert!(mps >= last);
            last = mps;
        }
    }

    #[test]
    fn adjacent_cells_differ_by_at_most_one_step() {
        let s = spec();
        for d in 0..256 {
            let a = s.meters_per_sample(0, 0, 0, d);
            let b = s.meters_per_sample(0, 0, 0, d + 1);
            assert!(b == a || b == a * 2, "step from {} to {} at d={}", a, b, d);
        }
    }

    #[test]
    fn range_is_clamped() {
        let s = spec();
        assert_eq!(s.meters_per_sample(0, 0, 0, 0), 1);
        assert_eq!(s.meters_per_sample(0, 0, 0, 1 << 40), 16);
    }
}
