//! The camera-relative page grid and its per-frame machinery

use std::time::{Duration, Instant};

use basalt_core::{meters_to_mm, BasaltError, Result, Vec3, ONE_METER};
use log::{debug, info};

use crate::config::TerrainConfig;
use crate::coord::PageCoord;
use crate::event::{EventBus, TerrainEvent};
use crate::height_source::HeightSource;
use crate::lod::LodSpec;
use crate::page::TerrainPage;
use crate::patch::TerrainPatch;
use crate::sub_page::SubPageHeightMap;

/// How a height query snaps to the sample grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeightMode {
    /// Round to the nearest sample
    Closest,
    /// Floor to the sample at or before the position
    Truncate,
    /// Triangular interpolation matching the rendered mesh split
    Interpolate,
}

/// Which sample grid a height query addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeightLod {
    /// The grid at the queried sub-page's currently cached spacing
    CurrentLod,
    /// The finest configured grid
    MaxLod,
}

/// The central terrain subsystem: a fixed-size array of pages kept
/// centered on the camera.
///
/// All state is mutated from the frame thread in a fixed order: camera
/// update (which may shift the page array), then either a full LOD
/// validation pass (after a tile crossing) or one bounded slice of the
/// background LOD prediction scan — never both in the same frame.
pub struct TerrainManager {
    config: TerrainConfig,
    lod_spec: Box<dyn LodSpec>,
    source: Box<dyn HeightSource>,

    /// Pages per array edge: `2 * visible_page_radius + 1`
    page_array_size: i64,
    /// Row-major slot arena; every slot holds exactly one page once the
    /// camera is established
    pages: Vec<Option<TerrainPage>>,

    camera_set: bool,
    camera_x_mm: i64,
    camera_z_mm: i64,
    camera_page: PageCoord,
    camera_sub_page: PageCoord,
    /// A page or sub-page boundary was crossed; LOD validation is due
    camera_tile_change: bool,

    do_lod_scan: bool,
    page_scan_x: i64,
    page_scan_z: i64,
    sub_scan_x: i64,
    sub_scan_z: i64,
    max_scan_time: Duration,

    events: EventBus,
}

impl TerrainManager {
    pub fn new(
        config: TerrainConfig,
        lod_spec: Box<dyn LodSpec>,
        source: Box<dyn HeightSource>,
    ) -> Result<Self> {
        config.validate()?;

        if lod_spec.page_size() != config.page_size {
            return Err(BasaltError::ConfigError(format!(
                "LOD spec page size {} does not match config page size {}",
                lod_spec.page_size(),
                config.page_size
            )));
        }
        for d in 0..=lod_spec.visible_page_radius() {
            let tiles = lod_spec.tiles_per_page(d);
            if tiles <= 0 || config.page_size % tiles != 0 {
                return Err(BasaltError::ConfigError(format!(
                    "tiles_per_page({}) = {} must divide page size {}",
                    d, tiles, config.page_size
                )));
            }
            let tile_size = config.page_size / tiles;
            if tile_size < 2 * config.max_meters_per_sample {
                return Err(BasaltError::ConfigError(format!(
                    "tile size {} too small for max_meters_per_sample {}",
                    tile_size, config.max_meters_per_sample
                )));
            }
        }

        let page_array_size = 2 * lod_spec.visible_page_radius() + 1;
        let slots = (page_array_size * page_array_size) as usize;
        let mut pages = Vec::with_capacity(slots);
        pages.resize_with(slots, || None);

        let max_scan_time = Duration::from_millis(config.max_scan_time_ms);
        Ok(Self {
            config,
            lod_spec,
            source,
            page_array_size,
            pages,
            camera_set: false,
            camera_x_mm: 0,
            camera_z_mm: 0,
            camera_page: PageCoord::new(0, 0, 1),
            camera_sub_page: PageCoord::new(0, 0, 1),
            camera_tile_change: false,
            do_lod_scan: false,
            page_scan_x: 0,
            page_scan_z: 0,
            sub_scan_x: 0,
            sub_scan_z: 0,
            max_scan_time,
            events: EventBus::new(),
        })
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn page_array_size(&self) -> i64 {
        self.page_array_size
    }

    pub fn is_camera_set(&self) -> bool {
        self.camera_set
    }

    pub fn camera_page(&self) -> PageCoord {
        self.camera_page
    }

    pub fn lod_scan_pending(&self) -> bool {
        self.do_lod_scan
    }

    /// Drain pending terrain events for collaborator systems.
    pub fn drain_events(&mut self) -> Vec<TerrainEvent> {
        self.events.drain()
    }

    /// Inform the terrain of the camera position (world meters). Detects
    /// page and sub-page crossings, shifting the page array as needed.
    pub fn update_camera(&mut self, position: Vec3) {
        self.update_camera_mm(meters_to_mm(position.x), meters_to_mm(position.z));
    }

    /// `update_camera` in fixed-point millimeters.
    pub fn update_camera_mm(&mut self, x_mm: i64, z_mm: i64) {
        let page = PageCoord::from_world(x_mm, z_mm, self.config.page_size);
        let sub = PageCoord::from_world(x_mm, z_mm, self.config.sub_page_size());

        self.camera_x_mm = x_mm;
        self.camera_z_mm = z_mm;
        self.events.push(TerrainEvent::CameraLocation { x_mm, z_mm });

        if !self.camera_set {
            self.camera_set = true;
            self.camera_page = page;
            self.camera_sub_page = sub;
            self.init_terrain_pages();
            self.camera_tile_change = true;
            self.reset_lod_scan();
            info!(
                "terrain camera established at page ({}, {})",
                page.x, page.z
            );
        } else if page != self.camera_page {
            let (dx, dz) = page.delta(&self.camera_page);
            self.camera_page = page;
            self.camera_sub_page = sub;

            if dx.abs() < self.page_array_size && dz.abs() < self.page_array_size {
                debug!("camera crossed page boundary, shifting by ({}, {})", dx, dz);
                self.shift_pages(dx, dz);
            } else {
                debug!("camera jumped {} x {} pages, reinitializing grid", dx, dz);
                self.init_terrain_pages();
            }
            self.events.push(TerrainEvent::PageShifted { dx, dz });
            self.camera_tile_change = true;
        } else if sub != self.camera_sub_page {
            self.camera_sub_page = sub;
            self.camera_tile_change = true;
        }
    }

    /// Run the deferred LOD machinery: a full validation pass if a tile
    /// boundary was crossed since the last call, otherwise one bounded
    /// slice of the prediction scan.
    pub fn process_lod_changes(&mut self) {
        if !self.camera_set {
            return;
        }
        if self.camera_tile_change {
            self.validate_all_lods();
            self.camera_tile_change = false;
            self.reset_lod_scan();
        } else if self.do_lod_scan {
            self.lod_prediction_scan();
        }
    }

    /// Restart the background scan from the array origin.
    pub fn reset_lod_scan(&mut self) {
        self.page_scan_x = 0;
        self.page_scan_z = 0;
        self.sub_scan_x = 0;
        self.sub_scan_z = 0;
        self.do_lod_scan = true;
    }

    /// Height at a world position. `Interpolate` regenerates the four
    /// surrounding corners directly from the height source and splits
    /// the cell into the same triangles the mesh uses, so queried and
    /// rendered heights agree. Returns `f32::MIN` until the camera is
    /// established.
    pub fn get_terrain_height(&self, x_mm: i64, z_mm: i64, mode: HeightMode, lod: HeightLod) -> f32 {
        if !self.camera_set {
            return f32::MIN;
        }
        let spacing_mm = self.query_spacing(x_mm, z_mm, lod) * ONE_METER;
        match mode {
            HeightMode::Interpolate => self.interpolated_height(x_mm, z_mm, spacing_mm),
            HeightMode::Truncate => {
                let sx = x_mm.div_euclid(spacing_mm) * spacing_mm;
                let sz = z_mm.div_euclid(spacing_mm) * spacing_mm;
                self.sample_height(sx, sz)
            }
            HeightMode::Closest => {
                let sx = (x_mm + spacing_mm / 2).div_euclid(spacing_mm) * spacing_mm;
                let sz = (z_mm + spacing_mm / 2).div_euclid(spacing_mm) * spacing_mm;
                self.sample_height(sx, sz)
            }
        }
    }

    /// Surface normal by central difference over 1-meter offsets at max
    /// LOD. Returns straight up until the camera is established.
    pub fn get_normal_at(&self, x_mm: i64, z_mm: i64) -> Vec3 {
        if !self.camera_set {
            return Vec3::UP;
        }
        let m = ONE_METER;
        let h_left = self.get_terrain_height(x_mm - m, z_mm, HeightMode::Interpolate, HeightLod::MaxLod);
        let h_right = self.get_terrain_height(x_mm + m, z_mm, HeightMode::Interpolate, HeightLod::MaxLod);
        let h_north = self.get_terrain_height(x_mm, z_mm - m, HeightMode::Interpolate, HeightLod::MaxLod);
        let h_south = self.get_terrain_height(x_mm, z_mm + m, HeightMode::Interpolate, HeightLod::MaxLod);

        Vec3::new(-(h_right - h_left) / 2.0, 1.0, -(h_south - h_north) / 2.0).normalized()
    }

    /// Max cached height over the bounding box of `points` (world
    /// meters). Returns `f32::MIN` when any part of the box lies outside
    /// the resident page window ("not yet loaded").
    pub fn get_area_height(&self, points: &[Vec3]) -> f32 {
        if !self.camera_set || points.is_empty() {
            return f32::MIN;
        }

        let mut min_x = f32::MAX;
        let mut max_x = f32::MIN;
        let mut min_z = f32::MAX;
        let mut max_z = f32::MIN;
        for p in points {
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_z = min_z.min(p.z);
            max_z = max_z.max(p.z);
        }

        let lo = PageCoord::from_world(
            meters_to_mm(min_x),
            meters_to_mm(min_z),
            self.config.page_size,
        );
        let hi = PageCoord::from_world(
            meters_to_mm(max_x),
            meters_to_mm(max_z),
            self.config.page_size,
        );

        let mut max_height = f32::MIN;
        for pz in lo.z..=hi.z {
            for px in lo.x..=hi.x {
                let page = match self.lookup_page_by_index(px, pz) {
                    Some(page) => page,
                    None => return f32::MIN,
                };
                let (loc_x, loc_z) = page.location();
                let x1 = (meters_to_mm(min_x) - loc_x).div_euclid(ONE_METER);
                let x2 = (meters_to_mm(max_x) - loc_x).div_euclid(ONE_METER) + 1;
                let z1 = (meters_to_mm(min_z) - loc_z).div_euclid(ONE_METER);
                let z2 = (meters_to_mm(max_z) - loc_z).div_euclid(ONE_METER) + 1;
                max_height = max_height.max(page.height_map().area_height(x1, x2, z1, z2));
            }
        }
        max_height
    }

    /// The resident page containing a world position, if any.
    pub fn lookup_page(&self, x_mm: i64, z_mm: i64) -> Option<&TerrainPage> {
        let coord = PageCoord::from_world(x_mm, z_mm, self.config.page_size);
        self.lookup_page_by_index(coord.x, coord.z)
    }

    /// The resident page at integer page coordinates, if any.
    pub fn lookup_page_by_index(&self, page_x: i64, page_z: i64) -> Option<&TerrainPage> {
        if !self.camera_set {
            return None;
        }
        let radius = self.lod_spec.visible_page_radius();
        let sx = page_x - (self.camera_page.x - radius);
        let sz = page_z - (self.camera_page.z - radius);
        if sx < 0 || sz < 0 || sx >= self.page_array_size || sz >= self.page_array_size {
            return None;
        }
        self.pages[(sz * self.page_array_size + sx) as usize].as_ref()
    }

    /// The resident tile (patch) containing a world position, if any.
    pub fn lookup_tile(&self, x_mm: i64, z_mm: i64) -> Option<&TerrainPatch> {
        let page = self.lookup_page(x_mm, z_mm)?;
        let (loc_x, loc_z) = page.location();
        let tile_mm = page.tile_size() * ONE_METER;
        let tx = (x_mm - loc_x).div_euclid(tile_mm);
        let tz = (z_mm - loc_z).div_euclid(tile_mm);
        Some(page.patch_at(tx, tz))
    }

    /// The resident sub-page height cache containing a world position,
    /// if any.
    pub fn lookup_sub_page(&self, x_mm: i64, z_mm: i64) -> Option<&SubPageHeightMap> {
        let page = self.lookup_page(x_mm, z_mm)?;
        let (loc_x, loc_z) = page.location();
        let sub_mm = self.config.sub_page_size() * ONE_METER;
        let sx = (x_mm - loc_x).div_euclid(sub_mm);
        let sz = (z_mm - loc_z).div_euclid(sub_mm);
        Some(page.height_map().sub_page(sx, sz))
    }

    /// Mutable access to a resident page (renderer-side geometry builds).
    pub fn lookup_page_mut(&mut self, x_mm: i64, z_mm: i64) -> Option<&mut TerrainPage> {
        if !self.camera_set {
            return None;
        }
        let coord = PageCoord::from_world(x_mm, z_mm, self.config.page_size);
        let radius = self.lod_spec.visible_page_radius();
        let sx = coord.x - (self.camera_page.x - radius);
        let sz = coord.z - (self.camera_page.z - radius);
        if sx < 0 || sz < 0 || sx >= self.page_array_size || sz >= self.page_array_size {
            return None;
        }
        self.pages[(sz * self.page_array_size + sx) as usize].as_mut()
    }

    /// The height source this manager was built with.
    pub fn height_source(&self) -> &dyn HeightSource {
        self.source.as_ref()
    }

    /// Export the resident page containing a world position as a
    /// page-local trimesh (physics, mesh dumps).
    pub fn page_trimesh(&mut self, x_mm: i64, z_mm: i64) -> Option<(Vec<[f32; 3]>, Vec<[u32; 3]>)> {
        if !self.camera_set {
            return None;
        }
        let coord = PageCoord::from_world(x_mm, z_mm, self.config.page_size);
        let radius = self.lod_spec.visible_page_radius();
        let sx = coord.x - (self.camera_page.x - radius);
        let sz = coord.z - (self.camera_page.z - radius);
        if sx < 0 || sz < 0 || sx >= self.page_array_size || sz >= self.page_array_size {
            return None;
        }
        let source = self.source.as_ref();
        self.pages[(sz * self.page_array_size + sx) as usize]
            .as_mut()
            .map(|page| page.trimesh_data(source))
    }

    /// Regenerate cached heights inside a world-space square after the
    /// underlying generator changed there, and invalidate affected patch
    /// geometry. Collaborators learn of it via `TerrainChanged`.
    pub fn refresh_region(&mut self, x_mm: i64, z_mm: i64, size_m: i64) {
        let size_mm = size_m * ONE_METER;
        let source = self.source.as_ref();
        for slot in self.pages.iter_mut() {
            let page = match slot {
                Some(page) => page,
                None => continue,
            };
            let (loc_x, loc_z) = page.location();
            let page_mm = page.page_size() * ONE_METER;
            if x_mm + size_mm <= loc_x
                || x_mm >= loc_x + page_mm
                || z_mm + size_mm <= loc_z
                || z_mm >= loc_z + page_mm
            {
                continue;
            }

            let map = page.height_map_mut();
            let sub_mm = map.sub_size() * ONE_METER;
            for sz in 0..map.sub_count() {
                for sx in 0..map.sub_count() {
                    let ox = loc_x + sx * sub_mm;
                    let oz = loc_z + sz * sub_mm;
                    if x_mm + size_mm <= ox
                        || x_mm >= ox + sub_mm
                        || z_mm + size_mm <= oz
                        || z_mm >= oz + sub_mm
                    {
                        continue;
                    }
                    // Re-setting the same location resets the cache
                    map.sub_page_mut(sx, sz).set_location(ox, oz, source);
                }
            }
            page.free_all_buffers();
        }

        self.events
            .push(TerrainEvent::TerrainChanged { x_mm, z_mm, size_m });
        self.camera_tile_change = self.camera_set;
    }

    /// World origin (mm) of the page slot at array position (sx, sz).
    fn slot_origin(&self, sx: i64, sz: i64) -> (i64, i64) {
        let radius = self.lod_spec.visible_page_radius();
        let page_mm = self.config.page_size * ONE_METER;
        (
            (self.camera_page.x - radius + sx) * page_mm,
            (self.camera_page.z - radius + sz) * page_mm,
        )
    }

    /// Discard everything and build a fresh page for every slot.
    fn init_terrain_pages(&mut self) {
        let radius = self.lod_spec.visible_page_radius();
        let lod_spec = self.lod_spec.as_ref();
        let source = self.source.as_ref();
        let camera_page = self.camera_page;
        let camera_sub_page = self.camera_sub_page;
        let config = &self.config;

        let tile_lod = |x: i64, z: i64| {
            required_tile_mps(lod_spec, config, &camera_page, &camera_sub_page, x, z)
        };

        let page_mm = config.page_size * ONE_METER;
        let mut pages = Vec::with_capacity(self.pages.len());
        for sz in 0..self.page_array_size {
            for sx in 0..self.page_array_size {
                let x_mm = (camera_page.x - radius + sx) * page_mm;
                let z_mm = (camera_page.z - radius + sz) * page_mm;
                let dist = sx.abs_diff(radius).max(sz.abs_diff(radius)) as i64;
                pages.push(Some(TerrainPage::new(
                    x_mm,
                    z_mm,
                    config.page_size,
                    config.sub_pages_per_page,
                    config.min_meters_per_sample,
                    config.max_meters_per_sample,
                    lod_spec.tiles_per_page(dist),
                    &tile_lod,
                    source,
                )));
            }
        }
        self.pages = pages;
        self.validate_page_array();
    }

    /// Shift the page arena after a small camera move: surviving pages
    /// relocate between slots without touching their caches; only the
    /// newly exposed rows/columns are regenerated.
    fn shift_pages(&mut self, dx: i64, dz: i64) {
        let s = self.page_array_size;
        let idx = |x: i64, z: i64| (z * s + x) as usize;
        let in_range = |v: i64| v >= 0 && v < s;

        // Pages whose content leaves the window
        for z in 0..s {
            for x in 0..s {
                if in_range(x - dx) && in_range(z - dz) {
                    continue;
                }
                if let Some(page) = &self.pages[idx(x, z)] {
                    let (px, pz) = page.location();
                    let coord = PageCoord::from_world(px, pz, self.config.page_size);
                    self.events.push(TerrainEvent::PageHidden {
                        page_x: coord.x,
                        page_z: coord.z,
                    });
                }
            }
        }

        // Move survivors; iteration order is chosen so a source slot is
        // always read before it is overwritten
        let xs: Vec<i64> = if dx >= 0 {
            (0..s).collect()
        } else {
            (0..s).rev().collect()
        };
        let zs: Vec<i64> = if dz >= 0 {
            (0..s).collect()
        } else {
            (0..s).rev().collect()
        };
        for &z in &zs {
            for &x in &xs {
                let (src_x, src_z) = (x + dx, z + dz);
                let moved = if in_range(src_x) && in_range(src_z) {
                    self.pages[idx(src_x, src_z)].take()
                } else {
                    None
                };
                self.pages[idx(x, z)] = moved;
            }
        }

        // Fresh pages for the exposed slots
        let radius = self.lod_spec.visible_page_radius();
        let lod_spec = self.lod_spec.as_ref();
        let source = self.source.as_ref();
        let camera_page = self.camera_page;
        let camera_sub_page = self.camera_sub_page;
        let config = &self.config;
        let tile_lod = |x: i64, z: i64| {
            required_tile_mps(lod_spec, config, &camera_page, &camera_sub_page, x, z)
        };

        let page_mm = config.page_size * ONE_METER;
        for z in 0..s {
            for x in 0..s {
                if self.pages[idx(x, z)].is_some() {
                    continue;
                }
                let x_mm = (camera_page.x - radius + x) * page_mm;
                let z_mm = (camera_page.z - radius + z) * page_mm;
                let dist = x.abs_diff(radius).max(z.abs_diff(radius)) as i64;
                self.pages[idx(x, z)] = Some(TerrainPage::new(
                    x_mm,
                    z_mm,
                    config.page_size,
                    config.sub_pages_per_page,
                    config.min_meters_per_sample,
                    config.max_meters_per_sample,
                    lod_spec.tiles_per_page(dist),
                    &tile_lod,
                    source,
                ));
                self.events.push(TerrainEvent::PageVisible {
                    page_x: camera_page.x - radius + x,
                    page_z: camera_page.z - radius + z,
                });
            }
        }

        self.validate_page_array();
    }

    /// Full per-tile-change validation: every page re-derives patch LODs
    /// and rebuilds stale patches and stitches.
    fn validate_all_lods(&mut self) {
        let radius = self.lod_spec.visible_page_radius();
        let lod_spec = self.lod_spec.as_ref();
        let camera_page = self.camera_page;
        let camera_sub_page = self.camera_sub_page;
        let config = &self.config;
        let tile_lod = |x: i64, z: i64| {
            required_tile_mps(lod_spec, config, &camera_page, &camera_sub_page, x, z)
        };

        let mut rebuilt = 0;
        for sz in 0..self.page_array_size {
            for sx in 0..self.page_array_size {
                let dist = sx.abs_diff(radius).max(sz.abs_diff(radius)) as i64;
                let tiles = lod_spec.tiles_per_page(dist);
                let slot = (sz * self.page_array_size + sx) as usize;
                if let Some(page) = self.pages[slot].as_mut() {
                    rebuilt += page.validate_lods(tiles, &tile_lod);
                }
            }
        }
        if rebuilt > 0 {
            debug!("LOD validation rebuilt {} patches", rebuilt);
        }
    }

    /// One time-bounded slice of the background LOD upgrade scan. Walks
    /// pages and sub-pages in raster order, upgrading each sub-page
    /// cache to its required spacing, and resumes from persisted cursors
    /// on the next call.
    fn lod_prediction_scan(&mut self) {
        let start = Instant::now();
        let s = self.page_array_size;
        let subs = self.config.sub_pages_per_page;
        let lod_spec = self.lod_spec.as_ref();
        let source = self.source.as_ref();
        let camera_page = self.camera_page;
        let camera_sub_page = self.camera_sub_page;
        let config = &self.config;

        loop {
            if self.page_scan_z >= s {
                self.do_lod_scan = false;
                debug!("LOD prediction scan complete");
                break;
            }

            let slot = (self.page_scan_z * s + self.page_scan_x) as usize;
            if let Some(page) = self.pages[slot].as_mut() {
                let (loc_x, loc_z) = page.location();
                let map = page.height_map_mut();
                let sub_mm = map.sub_size() * ONE_METER;
                let ox = loc_x + self.sub_scan_x * sub_mm;
                let oz = loc_z + self.sub_scan_z * sub_mm;
                let mps = required_tile_mps(lod_spec, config, &camera_page, &camera_sub_page, ox, oz);
                if mps > 0 {
                    map.sub_page_mut(self.sub_scan_x, self.sub_scan_z)
                        .set_meters_per_sample(mps, source);
                }
            }

            // Advance the cursor: sub-pages raster-first, then pages
            self.sub_scan_x += 1;
            if self.sub_scan_x >= subs {
                self.sub_scan_x = 0;
                self.sub_scan_z += 1;
                if self.sub_scan_z >= subs {
                    self.sub_scan_z = 0;
                    self.page_scan_x += 1;
                    if self.page_scan_x >= s {
                        self.page_scan_x = 0;
                        self.page_scan_z += 1;
                    }
                }
            }

            if start.elapsed() >= self.max_scan_time {
                break;
            }
        }
    }

    /// Query grid spacing in meters for the given LOD flag.
    fn query_spacing(&self, x_mm: i64, z_mm: i64, lod: HeightLod) -> i64 {
        match lod {
            HeightLod::MaxLod => self.config.min_meters_per_sample,
            HeightLod::CurrentLod => self
                .lookup_sub_page(x_mm, z_mm)
                .map(|sub| sub.meters_per_sample())
                .unwrap_or(self.config.min_meters_per_sample),
        }
    }

    /// Cached height at a grid-snapped world position; positions outside
    /// the resident window fall through to the source.
    fn sample_height(&self, x_mm: i64, z_mm: i64) -> f32 {
        match self.lookup_page(x_mm, z_mm) {
            Some(page) => {
                let (loc_x, loc_z) = page.location();
                page.height_map().get_height(
                    (x_mm - loc_x).div_euclid(ONE_METER),
                    (z_mm - loc_z).div_euclid(ONE_METER),
                    self.source.as_ref(),
                )
            }
            None => self.source.height_point_mm(x_mm, z_mm),
        }
    }

    /// Triangular interpolation over one grid cell. The corners are
    /// always regenerated from the height source so the result agrees
    /// exactly with mesh vertices built from the same source; reading
    /// possibly-stale cached samples here would let queried and rendered
    /// heights drift apart.
    fn interpolated_height(&self, x_mm: i64, z_mm: i64, spacing_mm: i64) -> f32 {
        let x0 = x_mm.div_euclid(spacing_mm) * spacing_mm;
        let z0 = z_mm.div_euclid(spacing_mm) * spacing_mm;
        let fx = (x_mm - x0) as f32 / spacing_mm as f32;
        let fz = (z_mm - z0) as f32 / spacing_mm as f32;

        let h_nw = self.source.height_point_mm(x0, z0);
        let h_se = self.source.height_point_mm(x0 + spacing_mm, z0 + spacing_mm);

        // The same NW-SE diagonal split the patch triangulation uses
        if fx >= fz {
            let h_ne = self.source.height_point_mm(x0 + spacing_mm, z0);
            h_nw + fx * (h_ne - h_nw) + fz * (h_se - h_ne)
        } else {
            let h_sw = self.source.height_point_mm(x0, z0 + spacing_mm);
            h_nw + fz * (h_sw - h_nw) + fx * (h_se - h_sw)
        }
    }

    /// Every slot must hold exactly one page whose location matches its
    /// slot; violated only by bugs in the shift bookkeeping.
    fn validate_page_array(&self) {
        if cfg!(debug_assertions) {
            for sz in 0..self.page_array_size {
                for sx in 0..self.page_array_size {
                    let slot = (sz * self.page_array_size + sx) as usize;
                    debug_assert!(self.pages[slot].is_some(), "page array slot left empty");
                    if let Some(page) = &self.pages[slot] {
                        debug_assert_eq!(page.location(), self.slot_origin(sx, sz));
                    }
                }
            }
        }
    }
}

/// Required meters-per-sample for the tile at a world origin, or 0 when
/// it lies outside the resident window.
fn required_tile_mps(
    lod_spec: &dyn LodSpec,
    config: &TerrainConfig,
    camera_page: &PageCoord,
    camera_sub_page: &PageCoord,
    x_mm: i64,
    z_mm: i64,
) -> i64 {
    let page = PageCoord::from_world(x_mm, z_mm, config.page_size);
    let pages_d = page.distance(camera_page);
    if pages_d > lod_spec.visible_page_radius() {
        return 0;
    }
    let sub = PageCoord::from_world(x_mm, z_mm, config.sub_page_size());
    let sub_d = sub.distance(camera_sub_page);
    let mps = lod_spec.meters_per_sample(x_mm, z_mm, pages_d, sub_d);
    debug_assert!(
        mps >= config.min_meters_per_sample
            && mps <= config.max_meters_per_sample
            && mps & (mps - 1) == 0,
        "LOD policy returned illegal spacing {}",
        mps
    );
    mps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::height_source::WaveHeightSource;
    use crate::lod::DefaultLodSpec;

    fn small_config() -> TerrainConfig {
        TerrainConfig {
            page_size: 64,
            sub_pages_per_page: 2,
            visible_page_radius: 1,
            min_meters_per_sample: 1,
            max_meters_per_sample: 4,
            max_scan_time_ms: 50,
        }
    }

    /// A policy that always wants maximum detail.
    struct MaxDetailSpec {
        page_size: i64,
        radius: i64,
    }

    impl LodSpec for MaxDetailSpec {
        fn page_size(&self) -> i64 {
            self.page_size
        }
        fn visible_page_radius(&self) -> i64 {
            self.radius
        }
        fn tiles_per_page(&self, _pages_from_camera: i64) -> i64 {
            4
        }
        fn meters_per_sample(&self, _x: i64, _z: i64, _pages: i64, _subs: i64) -> i64 {
            1
        }
    }

    fn manager_with_max_detail() -> TerrainManager {
        let config = small_config();
        let spec = MaxDetailSpec {
            page_size: config.page_size,
            radius: config.visible_page_radius,
        };
        TerrainManager::new(
            config,
            Box::new(spec),
            Box::new(WaveHeightSource::new(8.0, 48.0, 20.0)),
        )
        .unwrap()
    }

    fn default_manager() -> TerrainManager {
        let config = small_config();
        let spec = DefaultLodSpec::new(&config);
        TerrainManager::new(
            config,
            Box::new(spec),
            Box::new(WaveHeightSource::new(8.0, 48.0, 20.0)),
        )
        .unwrap()
    }

    #[test]
    fn queries_before_camera_return_sentinels() {
        let mgr = default_manager();
        assert_eq!(
            mgr.get_terrain_height(0, 0, HeightMode::Closest, HeightLod::MaxLod),
            f32::MIN
        );
        assert!(mgr.lookup_page(0, 0).is_none());
        assert_eq!(mgr.get_normal_at(0, 0), Vec3::UP);
    }

    #[test]
    fn first_camera_update_populates_the_window() {
        let mut mgr = default_manager();
        mgr.update_camera_mm(32_000, 32_000);

        assert!(mgr.is_camera_set());
        for pz in -1..=1 {
            for px in -1..=1 {
                let page = mgr.lookup_page_by_index(px, pz).unwrap();
                assert_eq!(page.location(), (px * 64_000, pz * 64_000));
            }
        }
        assert!(mgr.lookup_page_by_index(2, 0).is_none());
    }

    #[test]
    fn small_shift_preserves_surviving_caches() {
        let mut mgr = manager_with_max_detail();
        mgr.update_camera_mm(0, 0);

        // Upgrade a sub-page in the camera page, then step one page east
        {
            let page = mgr.lookup_page_mut(0, 0).unwrap();
            let src = WaveHeightSource::new(8.0, 48.0, 20.0);
            page.height_map_mut()
                .sub_page_mut(0, 0)
                .set_meters_per_sample(1, &src);
        }
        mgr.update_camera_mm(64_000, 0);

        // The page that was the camera page survived the shift intact
        let page = mgr.lookup_page_by_index(0, 0).unwrap();
        assert_eq!(page.height_map().sub_page(0, 0).cur_lod_levels(), 3);

        // The newly exposed column is fresh
        let fresh = mgr.lookup_page_by_index(2, 0).unwrap();
        assert_eq!(fresh.height_map().sub_page(0, 0).cur_lod_levels(), 1);

        // The page that fell off the west edge is gone
        assert!(mgr.lookup_page_by_index(-1, 0).is_none());
    }

    #[test]
    fn every_small_shift_leaves_a_consistent_window() {
        for dx in -2..=2_i64 {
            for dz in -2..=2_i64 {
                let mut mgr = default_manager();
                mgr.update_camera_mm(0, 0);
                mgr.update_camera_mm(dx * 64_000, dz * 64_000);

                // validate_page_array ran inside; spot-check the corners
                let radius = 1;
                for pz in dz - radius..=dz + radius {
                    for px in dx - radius..=dx + radius {
                        let page = mgr.lookup_page_by_index(px, pz).unwrap();
                        assert_eq!(page.location(), (px * 64_000, pz * 64_000));
                    }
                }
            }
        }
    }

    #[test]
    fn large_jump_reinitializes_everything() {
        let mut mgr = manager_with_max_detail();
        mgr.update_camera_mm(0, 0);
        {
            let page = mgr.lookup_page_mut(0, 0).unwrap();
            let src = WaveHeightSource::new(8.0, 48.0, 20.0);
            page.height_map_mut()
                .sub_page_mut(0, 0)
                .set_meters_per_sample(1, &src);
        }

        // Three pages exceeds the array size, nothing survives
        mgr.update_camera_mm(3 * 64_000, 0);
        let page = mgr.lookup_page_by_index(3, 0).unwrap();
        assert_eq!(page.height_map().sub_page(0, 0).cur_lod_levels(), 1);
        assert!(mgr.lookup_page_by_index(0, 0).is_none());
    }

    #[test]
    fn shift_emits_visibility_events() {
        let mut mgr = default_manager();
        mgr.update_camera_mm(0, 0);
        mgr.drain_events();

        mgr.update_camera_mm(64_000, 0);
        let events = mgr.drain_events();
        assert!(events.contains(&TerrainEvent::PageShifted { dx: 1, dz: 0 }));
        let hidden = events
            .iter()
            .filter(|e| matches!(e, TerrainEvent::PageHidden { .. }))
            .count();
        let visible = events
            .iter()
            .filter(|e| matches!(e, TerrainEvent::PageVisible { .. }))
            .count();
        assert_eq!(hidden, 3);
        assert_eq!(visible, 3);
    }

    #[test]
    fn generous_scan_budget_upgrades_every_sub_page_in_one_call() {
        let mut mgr = manager_with_max_detail();
        mgr.update_camera_mm(32_000, 32_000);

        // Consume the pending tile-change validation, then scan
        mgr.process_lod_changes();
        assert!(mgr.lod_scan_pending());
        mgr.process_lod_changes();
        assert!(!mgr.lod_scan_pending());

        for pz in -1..=1 {
            for px in -1..=1 {
                let page = mgr.lookup_page_by_index(px, pz).unwrap();
                for sz in 0..2 {
                    for sx in 0..2 {
                        assert_eq!(
                            page.height_map().sub_page(sx, sz).meters_per_sample(),
                            1,
                            "sub-page ({}, {}) of page ({}, {})",
                            sx,
                            sz,
                            px,
                            pz
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn zero_budget_scan_still_makes_progress() {
        let mut mgr = manager_with_max_detail();
        mgr.config.max_scan_time_ms = 0;
        mgr.max_scan_time = Duration::from_millis(0);
        mgr.update_camera_mm(0, 0);
        mgr.process_lod_changes(); // tile-change pass

        // 9 pages x 4 sub-pages, one step per call, plus one call to
        // notice completion
        let mut calls = 0;
        while mgr.lod_scan_pending() {
            mgr.process_lod_changes();
            calls += 1;
            assert!(calls <= 9 * 4 + 1, "scan failed to terminate");
        }
        assert!(calls >= 9 * 4 / 2, "scan advanced implausibly fast");
    }

    #[test]
    fn reset_lod_scan_restarts_the_cursor() {
        let mut mgr = manager_with_max_detail();
        mgr.update_camera_mm(0, 0);
        mgr.process_lod_changes();
        mgr.process_lod_changes();
        assert!(!mgr.lod_scan_pending());

        mgr.reset_lod_scan();
        assert!(mgr.lod_scan_pending());
        assert_eq!(
            (mgr.page_scan_x, mgr.page_scan_z, mgr.sub_scan_x, mgr.sub_scan_z),
            (0, 0, 0, 0)
        );
    }

    #[test]
    fn snapped_height_modes_agree_with_the_source() {
        let mut mgr = default_manager();
        mgr.update_camera_mm(0, 0);
        let src = WaveHeightSource::new(8.0, 48.0, 20.0);

        // Truncate floors to the grid
        let h = mgr.get_terrain_height(5_400, 9_900, HeightMode::Truncate, HeightLod::MaxLod);
        assert_eq!(h, src.height_point_mm(5_000, 9_000));

        // Closest rounds
        let h = mgr.get_terrain_height(5_600, 9_400, HeightMode::Closest, HeightLod::MaxLod);
        assert_eq!(h, src.height_point_mm(6_000, 9_000));
    }

    #[test]
    fn interpolated_height_is_exact_for_planar_terrain() {
        struct Ramp;
        impl HeightSource for Ramp {
            fn height_point_mm(&self, x_mm: i64, z_mm: i64) -> f32 {
                x_mm as f32 * 0.5e-3 + z_mm as f32 * 0.25e-3
            }
        }

        let config = small_config();
        let spec = MaxDetailSpec {
            page_size: config.page_size,
            radius: config.visible_page_radius,
        };
        let mut mgr = TerrainManager::new(config, Box::new(spec), Box::new(Ramp)).unwrap();
        mgr.update_camera_mm(0, 0);

        // Points on both sides of the diagonal split
        for (x, z) in [(3_250, 7_750), (3_750, 7_250), (10_500, 10_500), (0, 0)] {
            let h = mgr.get_terrain_height(x, z, HeightMode::Interpolate, HeightLod::MaxLod);
            let expect = x as f32 * 0.5e-3 + z as f32 * 0.25e-3;
            assert!((h - expect).abs() < 1e-4, "at ({}, {}): {} vs {}", x, z, h, expect);
        }
    }

    #[test]
    fn normals_follow_the_slope() {
        struct Ramp;
        impl HeightSource for Ramp {
            fn height_point_mm(&self, x_mm: i64, _z_mm: i64) -> f32 {
                x_mm as f32 * 1.0e-3
            }
        }

        let config = small_config();
        let spec = MaxDetailSpec {
            page_size: config.page_size,
            radius: config.visible_page_radius,
        };
        let mut mgr = TerrainManager::new(config, Box::new(spec), Box::new(Ramp)).unwrap();
        mgr.update_camera_mm(0, 0);

        let n = mgr.get_normal_at(10_000, 10_000);
        // Slope 1 in x: normal is (-1, 1, 0) normalized
        assert!((n.x + std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
        assert!((n.y - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
        assert!(n.z.abs() < 1e-3);
    }

    #[test]
    fn area_height_reports_unknown_outside_the_window() {
        let mut mgr = default_manager();
        mgr.update_camera_mm(0, 0);

        let inside = [Vec3::new(-10.0, 0.0, -10.0), Vec3::new(10.0, 0.0, 10.0)];
        assert!(mgr.get_area_height(&inside) > f32::MIN);

        let outside = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(500.0, 0.0, 0.0)];
        assert_eq!(mgr.get_area_height(&outside), f32::MIN);
    }

    #[test]
    fn lookup_tile_and_sub_page_inside_the_window() {
        let mut mgr = default_manager();
        mgr.update_camera_mm(0, 0);

        let tile = mgr.lookup_tile(20_000, 20_000).unwrap();
        assert_eq!(tile.start(), (16, 16));

        let sub = mgr.lookup_sub_page(40_000, 40_000).unwrap();
        assert_eq!(sub.location(), (32_000, 32_000));

        assert!(mgr.lookup_tile(300_000, 0).is_none());
    }

    #[test]
    fn refresh_region_resets_caches_and_notifies() {
        let mut mgr = manager_with_max_detail();
        mgr.update_camera_mm(0, 0);
        mgr.process_lod_changes();
        mgr.process_lod_changes(); // fully upgraded
        mgr.drain_events();

        mgr.refresh_region(-10_000, -10_000, 20);
        let sub = mgr.lookup_sub_page(0, 0).unwrap();
        assert_eq!(sub.cur_lod_levels(), 1);

        let events = mgr.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            TerrainEvent::TerrainChanged { size_m: 20, .. }
        )));
    }
}
