//! One camera-relative grid cell: a page of terrain tiles

use basalt_core::ONE_METER;

use crate::height_source::HeightSource;
use crate::page_height_map::PageHeightMap;
use crate::patch::{GeometryData, TerrainPatch};

/// Computes the required meters-per-sample for the tile whose world
/// origin (fixed-point millimeters) is given, or 0 when the tile lies
/// outside the resident window (map edge for stitching purposes).
pub type TileLodFn<'a> = &'a dyn Fn(i64, i64) -> i64;

/// A page of terrain: one `PageHeightMap` plus a square array of
/// `TerrainPatch` tiles.
///
/// The grid slot a page occupies is permanent; the world location it
/// represents shifts as the camera moves, at which point the page is
/// relocated (cache reset) and its patches rebuilt.
pub struct TerrainPage {
    /// World origin, fixed-point millimeters
    x_mm: i64,
    z_mm: i64,
    /// Page extent in meters
    page_size: i64,
    /// Patches per page edge at the page's current camera distance
    tiles_per_page: i64,
    height_map: PageHeightMap,
    /// Row-major `tiles_per_page` x `tiles_per_page`
    patches: Vec<TerrainPatch>,
}

impl TerrainPage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        x_mm: i64,
        z_mm: i64,
        page_size: i64,
        sub_pages_per_page: i64,
        min_mps: i64,
        max_mps: i64,
        tiles_per_page: i64,
        tile_mps: TileLodFn,
        source: &dyn HeightSource,
    ) -> Self {
        let height_map = PageHeightMap::new(
            page_size,
            sub_pages_per_page,
            min_mps,
            max_mps,
            x_mm,
            z_mm,
            source,
        );
        let mut page = Self {
            x_mm,
            z_mm,
            page_size,
            tiles_per_page,
            height_map,
            patches: Vec::new(),
        };
        page.rebuild_patches(tile_mps);
        page
    }

    pub fn location(&self) -> (i64, i64) {
        (self.x_mm, self.z_mm)
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub fn tiles_per_page(&self) -> i64 {
        self.tiles_per_page
    }

    pub fn tile_size(&self) -> i64 {
        self.page_size / self.tiles_per_page
    }

    pub fn height_map(&self) -> &PageHeightMap {
        &self.height_map
    }

    pub fn height_map_mut(&mut self) -> &mut PageHeightMap {
        &mut self.height_map
    }

    pub fn patch_at(&self, tx: i64, tz: i64) -> &TerrainPatch {
        &self.patches[(tz * self.tiles_per_page + tx) as usize]
    }

    pub fn patch_at_mut(&mut self, tx: i64, tz: i64) -> &mut TerrainPatch {
        &mut self.patches[(tz * self.tiles_per_page + tx) as usize]
    }

    pub fn patches(&self) -> &[TerrainPatch] {
        &self.patches
    }

    /// Relocate this page to a new world origin: resets every sub-page
    /// cache and rebuilds all patches for the new location.
    pub fn set_location(
        &mut self,
        x_mm: i64,
        z_mm: i64,
        tiles_per_page: i64,
        tile_mps: TileLodFn,
        source: &dyn HeightSource,
    ) {
        self.x_mm = x_mm;
        self.z_mm = z_mm;
        self.tiles_per_page = tiles_per_page;
        self.height_map.set_location(x_mm, z_mm, source);
        self.rebuild_patches(tile_mps);
    }

    /// Re-derive every patch's required LOD and neighbor LODs; replace
    /// any patch whose own LOD changed or whose stitch no longer matches.
    /// Returns the number of patches recreated.
    pub fn validate_lods(&mut self, tiles_per_page: i64, tile_mps: TileLodFn) -> usize {
        if tiles_per_page != self.tiles_per_page {
            self.tiles_per_page = tiles_per_page;
            self.rebuild_patches(tile_mps);
            return self.patches.len();
        }

        let tile_size = self.tile_size();
        let tile_mm = tile_size * ONE_METER;
        let mut rebuilt = 0;

        for tz in 0..self.tiles_per_page {
            for tx in 0..self.tiles_per_page {
                let px = self.x_mm + tx * tile_mm;
                let pz = self.z_mm + tz * tile_mm;
                let own = tile_mps(px, pz);
                let south = tile_mps(px, pz + tile_mm);
                let east = tile_mps(px + tile_mm, pz);
                debug_assert!(own > 0, "resident tile must have a required LOD");

                let idx = (tz * self.tiles_per_page + tx) as usize;
                let patch = &self.patches[idx];
                if patch.meters_per_sample() != own || !patch.validate_stitch(south, east) {
                    self.patches[idx] =
                        TerrainPatch::new(tx * tile_size, tz * tile_size, tile_size, own, south, east, px, pz);
                    rebuilt += 1;
                }
            }
        }
        rebuilt
    }

    /// Drop all built patch geometry.
    pub fn free_all_buffers(&mut self) {
        for patch in &mut self.patches {
            patch.free_buffers();
        }
    }

    /// Build (or fetch) the geometry for one patch, resolving heights
    /// against this page's cache.
    pub fn patch_geometry(&mut self, tx: i64, tz: i64, source: &dyn HeightSource) -> &GeometryData {
        let idx = (tz * self.tiles_per_page + tx) as usize;
        self.patches[idx].geometry(&self.height_map, source)
    }

    /// Export the whole page as a single page-local trimesh for physics.
    /// Returns (vertices, triangle indices); vertex positions are meters
    /// relative to the page origin.
    pub fn trimesh_data(&mut self, source: &dyn HeightSource) -> (Vec<[f32; 3]>, Vec<[u32; 3]>) {
        let mut vertices = Vec::new();
        let mut triangles = Vec::new();
        let mut base_index: u32 = 0;

        for idx in 0..self.patches.len() {
            let (start_x, start_z) = self.patches[idx].start();
            // Split borrow: geometry needs &mut patch plus &height_map
            let patch = &mut self.patches[idx];
            let geo = patch.geometry(&self.height_map, source);

            for p in &geo.positions {
                vertices.push([p[0] + start_x as f32, p[1], p[2] + start_z as f32]);
            }
            for tri in geo.indices.chunks(3) {
                triangles.push([
                    tri[0] + base_index,
                    tri[1] + base_index,
                    tri[2] + base_index,
                ]);
            }
            base_index = vertices.len() as u32;
        }

        (vertices, triangles)
    }

    fn rebuild_patches(&mut self, tile_mps: TileLodFn) {
        let tile_size = self.tile_size();
        let tile_mm = tile_size * ONE_METER;
        let count = (self.tiles_per_page * self.tiles_per_page) as usize;

        let mut patches = Vec::with_capacity(count);
        for tz in 0..self.tiles_per_page {
            for tx in 0..self.tiles_per_page {
                let px = self.x_mm + tx * tile_mm;
                let pz = self.z_mm + tz * tile_mm;
                let own = tile_mps(px, pz);
                let south = tile_mps(px, pz + tile_mm);
                let east = tile_mps(px + tile_mm, pz);
                debug_assert!(own > 0, "resident tile must have a required LOD");

                patches.push(TerrainPatch::new(
                    tx * tile_size,
                    tz * tile_size,
                    tile_size,
                    own,
                    south,
                    east,
                    px,
                    pz,
                ));
            }
        }
        self.patches = patches;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::height_source::WaveHeightSource;

    fn uniform_lod(mps: i64) -> impl Fn(i64, i64) -> i64 {
        move |_, _| mps
    }

    #[test]
    fn builds_a_full_patch_grid() {
        let src = WaveHeightSource::flat(0.0);
        let lod = uniform_lod(4);
        let page = TerrainPage::new(0, 0, 256, 4, 1, 16, 8, &lod, &src);

        assert_eq!(page.patches().len(), 64);
        assert_eq!(page.tile_size(), 32);
        assert_eq!(page.patch_at(3, 5).start(), (96, 160));
        assert_eq!(page.patch_at(3, 5).location(), (96_000, 160_000));
    }

    #[test]
    fn validate_keeps_patches_when_nothing_changed() {
        let src = WaveHeightSource::flat(0.0);
        let lod = uniform_lod(4);
        let mut page = TerrainPage::new(0, 0, 256, 4, 1, 16, 8, &lod, &src);
        assert_eq!(page.validate_lods(8, &lod), 0);
    }

    #[test]
    fn validate_rebuilds_on_lod_change() {
        let src = WaveHeightSource::flat(0.0);
        let lod4 = uniform_lod(4);
        let lod8 = uniform_lod(8);
        let mut page = TerrainPage::new(0, 0, 256, 4, 1, 16, 8, &lod4, &src);

        assert_eq!(page.validate_lods(8, &lod8), 64);
        assert_eq!(page.patch_at(0, 0).meters_per_sample(), 8);
    }

    #[test]
    fn validate_rebuilds_on_neighbor_stitch_change() {
        let src = WaveHeightSource::flat(0.0);
        let mut page = TerrainPage::new(0, 0, 256, 4, 1, 16, 8, &uniform_lod(4), &src);

        // LOD doubles east of x = 128 m: columns 4..7 change their own
        // LOD, and column 3 must restitch against its east neighbor
        let split = |x_mm: i64, _z_mm: i64| if x_mm >= 128_000 { 8 } else { 4 };
        let rebuilt = page.validate_lods(8, &split);
        assert_eq!(rebuilt, 5 * 8);
    }

    #[test]
    fn tile_count_change_rebuilds_everything() {
        let src = WaveHeightSource::flat(0.0);
        let lod = uniform_lod(8);
        let mut page = TerrainPage::new(0, 0, 256, 4, 1, 16, 8, &lod, &src);
        assert_eq!(page.validate_lods(4, &lod), 16);
        assert_eq!(page.tiles_per_page(), 4);
        assert_eq!(page.tile_size(), 64);
    }

    #[test]
    fn relocation_resets_caches_and_patches() {
        let src = WaveHeightSource::new(5.0, 40.0, 0.0);
        let lod = uniform_lod(4);
        let mut page = TerrainPage::new(0, 0, 256, 4, 1, 16, 8, &lod, &src);
        page.height_map_mut().sub_page_mut(0, 0).set_meters_per_sample(1, &src);

        page.set_location(256_000, 0, 8, &lod, &src);
        assert_eq!(page.location(), (256_000, 0));
        assert_eq!(page.height_map().sub_page(0, 0).cur_lod_levels(), 1);
        assert_eq!(page.patch_at(0, 0).location(), (256_000, 0));
    }

    #[test]
    fn trimesh_spans_the_page() {
        let src = WaveHeightSource::flat(2.0);
        let lod = uniform_lod(16);
        let mut page = TerrainPage::new(0, 0, 256, 4, 1, 16, 4, &lod, &src);

        let (verts, tris) = page.trimesh_data(&src);
        assert!(!verts.is_empty());
        for tri in &tris {
            assert!((tri[0] as usize) < verts.len());
            assert!((tri[1] as usize) < verts.len());
            assert!((tri[2] as usize) < verts.len());
        }
        // Every vertex lies within the page square
        for v in &verts {
            assert!(v[0] >= 0.0 && v[0] <= 256.0);
            assert!(v[2] >= 0.0 && v[2] <= 256.0);
            assert_eq!(v[1], 2.0);
        }
    }
}
