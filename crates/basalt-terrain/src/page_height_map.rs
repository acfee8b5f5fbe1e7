//! Per-page grid of sub-page height caches

use basalt_core::ONE_METER;

use crate::height_source::HeightSource;
use crate::sub_page::SubPageHeightMap;

/// The height cache for one page: a fixed grid of `SubPageHeightMap`s
/// plus aggregate min/max bounds.
///
/// Mutation happens only through the constituent sub-pages (LOD upgrades
/// during the prediction scan, relocation on page shifts); this type
/// routes lookups and recomputes aggregates.
pub struct PageHeightMap {
    /// Sub-pages per edge
    sub_count: i64,
    /// Sub-page extent in meters
    sub_size: i64,
    /// World origin of the page, fixed-point millimeters
    x_mm: i64,
    z_mm: i64,
    /// Row-major `sub_count` x `sub_count`
    subs: Vec<SubPageHeightMap>,
}

impl PageHeightMap {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        page_size: i64,
        sub_count: i64,
        min_mps: i64,
        max_mps: i64,
        x_mm: i64,
        z_mm: i64,
        source: &dyn HeightSource,
    ) -> Self {
        debug_assert!(page_size % sub_count == 0);
        let sub_size = page_size / sub_count;

        let mut subs = Vec::with_capacity((sub_count * sub_count) as usize);
        for sz in 0..sub_count {
            for sx in 0..sub_count {
                subs.push(SubPageHeightMap::new(
                    sub_size,
                    min_mps,
                    max_mps,
                    x_mm + sx * sub_size * ONE_METER,
                    z_mm + sz * sub_size * ONE_METER,
                    source,
                ));
            }
        }

        Self {
            sub_count,
            sub_size,
            x_mm,
            z_mm,
            subs,
        }
    }

    pub fn location(&self) -> (i64, i64) {
        (self.x_mm, self.z_mm)
    }

    pub fn sub_count(&self) -> i64 {
        self.sub_count
    }

    pub fn sub_size(&self) -> i64 {
        self.sub_size
    }

    pub fn page_size(&self) -> i64 {
        self.sub_count * self.sub_size
    }

    /// Relocate the page: every sub-page slot keeps its grid position but
    /// is rewritten to the new world location, resetting its cache.
    pub fn set_location(&mut self, x_mm: i64, z_mm: i64, source: &dyn HeightSource) {
        self.x_mm = x_mm;
        self.z_mm = z_mm;
        for sz in 0..self.sub_count {
            for sx in 0..self.sub_count {
                let idx = (sz * self.sub_count + sx) as usize;
                self.subs[idx].set_location(
                    x_mm + sx * self.sub_size * ONE_METER,
                    z_mm + sz * self.sub_size * ONE_METER,
                    source,
                );
            }
        }
    }

    pub fn sub_page(&self, sx: i64, sz: i64) -> &SubPageHeightMap {
        &self.subs[(sz * self.sub_count + sx) as usize]
    }

    pub fn sub_page_mut(&mut self, sx: i64, sz: i64) -> &mut SubPageHeightMap {
        &mut self.subs[(sz * self.sub_count + sx) as usize]
    }

    /// Height at page-local sample coordinates (integer meters). Routes
    /// to the owning sub-page; coordinates outside the page fall through
    /// to a direct source call.
    pub fn get_height(&self, x: i64, z: i64, source: &dyn HeightSource) -> f32 {
        let page_size = self.page_size();
        if x < 0 || z < 0 || x >= page_size || z >= page_size {
            return source.height_point_mm(self.x_mm + x * ONE_METER, self.z_mm + z * ONE_METER);
        }
        let (sx, sz) = (x / self.sub_size, z / self.sub_size);
        self.sub_page(sx, sz)
            .get_height(x - sx * self.sub_size, z - sz * self.sub_size, source)
    }

    /// Aggregate (min, max) height over all sub-pages.
    pub fn height_bounds(&self) -> (f32, f32) {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for sub in &self.subs {
            let (lo, hi) = sub.height_bounds();
            min = min.min(lo);
            max = max.max(hi);
        }
        (min, max)
    }

    /// Max cached height over the page-local rectangle [x1, x2] x
    /// [z1, z2] (inclusive meters), clipped to the page. Returns
    /// `f32::MIN` when the rectangle misses the page entirely.
    pub fn area_height(&self, x1: i64, x2: i64, z1: i64, z2: i64) -> f32 {
        let page_size = self.page_size();
        let x1 = x1.max(0);
        let z1 = z1.max(0);
        let x2 = x2.min(page_size - 1);
        let z2 = z2.min(page_size - 1);
        if x1 > x2 || z1 > z2 {
            return f32::MIN;
        }

        let mut max = f32::MIN;
        for sz in 0..self.sub_count {
            for sx in 0..self.sub_count {
                let ox = sx * self.sub_size;
                let oz = sz * self.sub_size;
                if x2 < ox || x1 >= ox + self.sub_size || z2 < oz || z1 >= oz + self.sub_size {
                    continue;
                }
                let sub = self.sub_page(sx, sz);
                max = max.max(sub.area_height(
                    (x1 - ox).max(0),
                    (x2 - ox).min(self.sub_size - 1),
                    (z1 - oz).max(0),
                    (z2 - oz).min(self.sub_size - 1),
                ));
            }
        }
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::height_source::WaveHeightSource;

    #[test]
    fn routes_lookups_to_the_owning_sub_page() {
        let src = WaveHeightSource::new(10.0, 48.0, 0.0);
        let map = PageHeightMap::new(256, 4, 1, 16, 0, 0, &src);
        assert_eq!(map.sub_size(), 64);

        // Sample on the coarse grid of the (1, 2) sub-page
        let h = map.get_height(64 + 32, 128 + 16, &src);
        let direct = src.height_point_mm(96_000, 144_000);
        assert_eq!(h.to_bits(), direct.to_bits());
    }

    #[test]
    fn out_of_page_lookups_use_the_source() {
        let src = WaveHeightSource::new(10.0, 48.0, 0.0);
        let map = PageHeightMap::new(256, 4, 1, 16, 1_000_000, 0, &src);
        let h = map.get_height(256, -1, &src);
        assert_eq!(h, src.height_point_mm(1_000_000 + 256_000, -1_000));
    }

    #[test]
    fn bounds_aggregate_sub_pages() {
        let src = WaveHeightSource::flat(3.0);
        let map = PageHeightMap::new(256, 4, 1, 16, 0, 0, &src);
        assert_eq!(map.height_bounds(), (3.0, 3.0));
    }

    #[test]
    fn area_height_clips_to_the_page() {
        let src = WaveHeightSource::flat(9.0);
        let map = PageHeightMap::new(256, 4, 1, 16, 0, 0, &src);
        assert_eq!(map.area_height(-50, 500, -50, 500), 9.0);
        assert_eq!(map.area_height(300, 400, 0, 10), f32::MIN);
    }

    #[test]
    fn relocation_rewrites_every_sub_page() {
        let src = WaveHeightSource::new(5.0, 32.0, 0.0);
        let mut map = PageHeightMap::new(256, 4, 1, 16, 0, 0, &src);
        map.sub_page_mut(0, 0).set_meters_per_sample(1, &src);

        map.set_location(256_000, 0, &src);
        assert_eq!(map.location(), (256_000, 0));
        for sz in 0..4 {
            for sx in 0..4 {
                let sub = map.sub_page(sx, sz);
                assert_eq!(sub.cur_lod_levels(), 1);
                assert_eq!(
                    sub.location(),
                    (256_000 + sx * 64_000, sz * 64_000)
                );
            }
        }
    }
}
