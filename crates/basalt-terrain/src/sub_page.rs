//! Multi-resolution height cache for one sub-page square of terrain

use basalt_core::ONE_METER;

use crate::height_source::HeightSource;

/// A square height cache holding one of several discrete LODs.
///
/// Samples are stored one flat array per realized LOD level. Level 0 is
/// the full grid at the coarsest spacing; each finer level stores only
/// the sample positions absent from all coarser grids (the three
/// odd-coordinate quadrant classes), so a coarser level is a literal
/// subset of a finer one and upgrading never re-generates or moves an
/// existing sample.
///
/// Detail only grows over the cache's life: `set_meters_per_sample`
/// halves the spacing one step at a time and never demotes. The sole
/// invalidation path is `set_location`, used when a camera-page shift
/// repositions the owning slot.
pub struct SubPageHeightMap {
    /// Extent in meters (and in samples at 1 m spacing)
    size: i64,
    min_mps: i64,
    max_mps: i64,
    /// Total LOD levels between max and min spacing
    lod_levels: u32,
    /// Realized levels; grows from 1 up to `lod_levels`
    cur_lod_levels: u32,
    /// Spacing of the finest realized level, in meters
    cur_mps: i64,
    /// World origin, fixed-point millimeters
    x_mm: i64,
    z_mm: i64,
    /// levels[0]: full coarse grid; levels[k]: quadrant-packed new samples
    levels: Vec<Vec<f32>>,
    min_height: f32,
    max_height: f32,
}

impl SubPageHeightMap {
    pub fn new(
        size: i64,
        min_mps: i64,
        max_mps: i64,
        x_mm: i64,
        z_mm: i64,
        source: &dyn HeightSource,
    ) -> Self {
        debug_assert!(size > 0 && size % max_mps == 0);
        debug_assert!(min_mps > 0 && min_mps & (min_mps - 1) == 0);
        debug_assert!(max_mps % min_mps == 0);

        let lod_levels = (max_mps / min_mps).trailing_zeros() + 1;
        let mut map = Self {
            size,
            min_mps,
            max_mps,
            lod_levels,
            cur_lod_levels: 0,
            cur_mps: max_mps,
            x_mm,
            z_mm,
            levels: Vec::with_capacity(lod_levels as usize),
            min_height: f32::MAX,
            max_height: f32::MIN,
        };
        map.reset_height_maps(source);
        map
    }

    pub fn location(&self) -> (i64, i64) {
        (self.x_mm, self.z_mm)
    }

    /// Relocate this cache. Always invalidates every realized level and
    /// regenerates the coarsest one; regeneration is deterministic, so
    /// re-setting the same location reproduces identical arrays.
    pub fn set_location(&mut self, x_mm: i64, z_mm: i64, source: &dyn HeightSource) {
        self.x_mm = x_mm;
        self.z_mm = z_mm;
        self.reset_height_maps(source);
    }

    pub fn meters_per_sample(&self) -> i64 {
        self.cur_mps
    }

    pub fn cur_lod_levels(&self) -> u32 {
        self.cur_lod_levels
    }

    pub fn lod_levels(&self) -> u32 {
        self.lod_levels
    }

    /// (min, max) of all cached samples.
    pub fn height_bounds(&self) -> (f32, f32) {
        (self.min_height, self.max_height)
    }

    /// Grow the cache until its spacing reaches `target` meters per
    /// sample, one halving at a time. Requests coarser than the current
    /// spacing are a no-op; the cache is never demoted.
    pub fn set_meters_per_sample(&mut self, target: i64, source: &dyn HeightSource) {
        let target = target.clamp(self.min_mps, self.max_mps);
        while self.cur_mps > target {
            self.fill_lod(self.cur_mps / 2, source);
        }
    }

    /// Height at sample coordinates (integer meters relative to this
    /// sub-page's world origin).
    ///
    /// Falls back to an uncached, direct source call when the coordinate
    /// is outside the square or requires a finer LOD than is realized;
    /// this bounds worst-case cost at the price of a cache miss.
    pub fn get_height(&self, x: i64, z: i64, source: &dyn HeightSource) -> f32 {
        if x < 0 || z < 0 || x >= self.size || z >= self.size {
            return self.sample_source(x, z, source);
        }
        match self.home_mps(x, z) {
            Some(m) if m >= self.cur_mps => self.cached_height(x, z, m),
            _ => self.sample_source(x, z, source),
        }
    }

    /// Max cached height over the rectangle [x1, x2] x [z1, z2]
    /// (inclusive, meters), snapped outward to the current LOD grid.
    /// Returns `f32::MIN` if the snapped rectangle misses every sample.
    pub fn area_height(&self, x1: i64, x2: i64, z1: i64, z2: i64) -> f32 {
        let m = self.cur_mps;
        let lo_x = (x1.div_euclid(m) * m).max(0);
        let lo_z = (z1.div_euclid(m) * m).max(0);
        let hi_x = (x2.div_euclid(m) * m + if x2.rem_euclid(m) != 0 { m } else { 0 })
            .min(self.size - m);
        let hi_z = (z2.div_euclid(m) * m + if z2.rem_euclid(m) != 0 { m } else { 0 })
            .min(self.size - m);

        let mut max = f32::MIN;
        let mut z = lo_z;
        while z <= hi_z {
            let mut x = lo_x;
            while x <= hi_x {
                let m_home = self.home_mps(x, z).unwrap_or(self.max_mps);
                max = max.max(self.cached_height(x, z, m_home));
                x += m;
            }
            z += m;
        }
        max
    }

    /// Spacing of the coarsest grid containing (x, z), or None when the
    /// coordinate is finer than the minimum spacing.
    fn home_mps(&self, x: i64, z: i64) -> Option<i64> {
        let bits = x | z;
        if bits == 0 {
            return Some(self.max_mps);
        }
        let low = bits & -bits;
        if low < self.min_mps {
            return None;
        }
        Some(low.min(self.max_mps))
    }

    /// Read a realized sample. `m_home` must be the coordinate's home
    /// spacing and at least `cur_mps`.
    fn cached_height(&self, x: i64, z: i64, m_home: i64) -> f32 {
        let level = (self.max_mps / m_home).trailing_zeros() as usize;
        debug_assert!(level < self.cur_lod_levels as usize);
        if level == 0 {
            let n = (self.size / self.max_mps) as usize;
            let (sx, sz) = ((x / self.max_mps) as usize, (z / self.max_mps) as usize);
            self.levels[0][sz * n + sx]
        } else {
            let (sx, sz) = (x / m_home, z / m_home);
            let half = (self.size / m_home / 2) as usize;
            let class = match ((sx & 1) == 1, (sz & 1) == 1) {
                (true, false) => 0,
                (false, true) => 1,
                (true, true) => 2,
                (false, false) => unreachable!("even/even sample belongs to a coarser level"),
            };
            let (cx, cz) = ((sx >> 1) as usize, (sz >> 1) as usize);
            self.levels[level][class * half * half + cz * half + cx]
        }
    }

    fn sample_source(&self, x: i64, z: i64, source: &dyn HeightSource) -> f32 {
        source.height_point_mm(self.x_mm + x * ONE_METER, self.z_mm + z * ONE_METER)
    }

    /// Drop every realized level and regenerate the coarsest one at the
    /// current location.
    fn reset_height_maps(&mut self, source: &dyn HeightSource) {
        self.levels.clear();
        let mut coarse = Vec::new();
        let (min, max) =
            source.fill_height_field(self.x_mm, self.z_mm, self.size, self.max_mps, &mut coarse);
        self.levels.push(coarse);
        self.min_height = min;
        self.max_height = max;
        self.cur_lod_levels = 1;
        self.cur_mps = self.max_mps;
    }

    /// Realize one finer level: generate only the sample positions not
    /// present in any coarser grid (three quadrant classes).
    fn fill_lod(&mut self, new_mps: i64, source: &dyn HeightSource) {
        debug_assert_eq!(new_mps * 2, self.cur_mps);
        debug_assert!(new_mps >= self.min_mps);

        let n = self.size / new_mps;
        let half = n / 2;
        let mut level = Vec::with_capacity((3 * half * half) as usize);

        for class in 0..3 {
            for cz in 0..half {
                for cx in 0..half {
                    let (sx, sz) = match class {
                        0 => (2 * cx + 1, 2 * cz),
                        1 => (2 * cx, 2 * cz + 1),
                        _ => (2 * cx + 1, 2 * cz + 1),
                    };
                    let h = self.sample_source(sx * new_mps, sz * new_mps, source);
                    self.min_height = self.min_height.min(h);
                    self.max_height = self.max_height.max(h);
                    level.push(h);
                }
            }
        }

        self.levels.push(level);
        self.cur_lod_levels += 1;
        self.cur_mps = new_mps;
    }

    #[cfg(test)]
    pub(crate) fn level_samples(&self, level: usize) -> Option<&[f32]> {
        self.levels.get(level).map(|l| l.as_slice())
    }
}
