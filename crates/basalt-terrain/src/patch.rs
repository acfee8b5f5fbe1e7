//! Renderable terrain tiles and the T-junction-free stitch tables

use basalt_core::{mm_to_meters, Vec3, ONE_METER};

use crate::height_source::HeightSource;
use crate::page_height_map::PageHeightMap;

/// Raw geometry buffers for one tile (positions, normals, UVs, indices).
///
/// Positions are patch-local meters with the world origin carried
/// alongside, so far-from-origin pages keep full f32 precision. The
/// renderer binding uploads these as-is.
#[derive(Clone)]
pub struct GeometryData {
    /// World origin of the patch in meters
    pub world_origin: Vec3,
    /// Vertex positions, patch-local meters
    pub positions: Vec<[f32; 3]>,
    /// Vertex normals
    pub normals: Vec<[f32; 3]>,
    /// UV coordinates normalized over the patch
    pub uvs: Vec<[f32; 2]>,
    /// Triangle indices, consistent winding throughout
    pub indices: Vec<u32>,
    /// AABB minimum corner (patch-local)
    pub aabb_min: [f32; 3],
    /// AABB maximum corner (patch-local)
    pub aabb_max: [f32; 3],
}

/// Relative sample density of a neighbor edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EdgeRatio {
    /// Same spacing, or map edge (the patch supplies its own border row)
    Equal,
    /// Neighbor is one halving step denser
    Finer,
    /// Neighbor is one doubling step coarser
    Coarser,
}

/// Classify a neighbor's meters-per-sample against our own. Anything
/// outside one doubling step means the LOD policy produced an
/// inconsistent page; that is a contract violation, not a runtime
/// condition to handle.
fn edge_ratio(own_mps: i64, neighbor_mps: i64) -> EdgeRatio {
    if neighbor_mps == 0 || neighbor_mps == own_mps {
        EdgeRatio::Equal
    } else if neighbor_mps * 2 == own_mps {
        EdgeRatio::Finer
    } else if neighbor_mps == own_mps * 2 {
        EdgeRatio::Coarser
    } else {
        debug_assert!(
            false,
            "illegal neighbor LOD: own {} vs neighbor {}",
            own_mps, neighbor_mps
        );
        EdgeRatio::Equal
    }
}

/// One renderable tile at a fixed LOD.
///
/// A patch is immutable once created: when its required LOD or either
/// stitched neighbor's LOD changes, the owning page replaces the whole
/// patch rather than mutating it. Geometry buffers are built lazily on
/// first use and explicitly freed on invalidation.
pub struct TerrainPatch {
    /// Offset within the page, meters
    start_x: i64,
    start_z: i64,
    /// Extent in meters
    size: i64,
    /// Sample spacing of this patch
    mps: i64,
    /// Sample spacing of the south neighbor tile (0 = map edge)
    south_mps: i64,
    /// Sample spacing of the east neighbor tile (0 = map edge)
    east_mps: i64,
    /// World origin, fixed-point millimeters
    x_mm: i64,
    z_mm: i64,
    geometry: Option<GeometryData>,
}

impl TerrainPatch {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        start_x: i64,
        start_z: i64,
        size: i64,
        mps: i64,
        south_mps: i64,
        east_mps: i64,
        x_mm: i64,
        z_mm: i64,
    ) -> Self {
        debug_assert!(size % mps == 0 && size / mps >= 2);
        debug_assert!(mps > 0 && mps & (mps - 1) == 0);
        // Force the ratio assertions at construction time
        let _ = edge_ratio(mps, south_mps);
        let _ = edge_ratio(mps, east_mps);

        Self {
            start_x,
            start_z,
            size,
            mps,
            south_mps,
            east_mps,
            x_mm,
            z_mm,
            geometry: None,
        }
    }

    pub fn start(&self) -> (i64, i64) {
        (self.start_x, self.start_z)
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn meters_per_sample(&self) -> i64 {
        self.mps
    }

    pub fn south_mps(&self) -> i64 {
        self.south_mps
    }

    pub fn east_mps(&self) -> i64 {
        self.east_mps
    }

    pub fn location(&self) -> (i64, i64) {
        (self.x_mm, self.z_mm)
    }

    /// O(1) check whether this patch's stitch geometry is still valid
    /// against freshly computed neighbor LODs. Does not rebuild anything.
    pub fn validate_stitch(&self, south_mps: i64, east_mps: i64) -> bool {
        self.south_mps == south_mps && self.east_mps == east_mps
    }

    pub fn has_buffers(&self) -> bool {
        self.geometry.is_some()
    }

    /// Drop built geometry; the next `geometry` call rebuilds it.
    pub fn free_buffers(&mut self) {
        self.geometry = None;
    }

    /// Borrow the patch geometry, building it on first use.
    pub fn geometry(&mut self, heights: &PageHeightMap, source: &dyn HeightSource) -> &GeometryData {
        if self.geometry.is_none() {
            self.geometry = Some(self.build_geometry(heights, source));
        }
        self.geometry.as_ref().expect("just built")
    }

    /// Build the full tile mesh: interior grid plus the south/east stitch
    /// border ring at the neighbors' resolutions.
    fn build_geometry(&self, heights: &PageHeightMap, source: &dyn HeightSource) -> GeometryData {
        let n = (self.size / self.mps) as usize;
        let south = edge_ratio(self.mps, self.south_mps);
        let east = edge_ratio(self.mps, self.east_mps);

        // Border rows are emitted at the neighbor's spacing so its
        // interior vertices coincide with ours exactly.
        let s_step = match south {
            EdgeRatio::Equal => self.mps,
            EdgeRatio::Finer => self.mps / 2,
            EdgeRatio::Coarser => self.mps * 2,
        };
        let e_step = match east {
            EdgeRatio::Equal => self.mps,
            EdgeRatio::Finer => self.mps / 2,
            EdgeRatio::Coarser => self.mps * 2,
        };
        let scount = (self.size / s_step) as usize;
        let ecount = (self.size / e_step) as usize;

        let vert_count = n * n + scount + ecount + 1;
        let mut positions = Vec::with_capacity(vert_count);
        let mut normals = Vec::with_capacity(vert_count);
        let mut uvs = Vec::with_capacity(vert_count);
        let mut aabb_min = [f32::MAX; 3];
        let mut aabb_max = [f32::MIN; 3];

        let mut push_vertex = |lx: i64, lz: i64| {
            let h = heights.get_height(self.start_x + lx, self.start_z + lz, source);
            let pos = [lx as f32, h, lz as f32];
            for i in 0..3 {
                aabb_min[i] = aabb_min[i].min(pos[i]);
                aabb_max[i] = aabb_max[i].max(pos[i]);
            }
            positions.push(pos);
            normals.push(self.vertex_normal(lx, lz, source));
            uvs.push([
                lx as f32 / self.size as f32,
                lz as f32 / self.size as f32,
            ]);
        };

        // Interior grid: rows 0..n-1 in both axes; the last row and
        // column of the square belong to the stitch ring.
        for j in 0..n {
            for i in 0..n {
                push_vertex(i as i64 * self.mps, j as i64 * self.mps);
            }
        }
        // South border row at the south neighbor's spacing
        for k in 0..scount {
            push_vertex(k as i64 * s_step, self.size);
        }
        // East border column at the east neighbor's spacing
        for k in 0..ecount {
            push_vertex(self.size, k as i64 * e_step);
        }
        // The single shared corner sample
        push_vertex(self.size, self.size);

        let indices = build_stitch_index_buffer(n, south, east);

        GeometryData {
            world_origin: Vec3::new(mm_to_meters(self.x_mm), 0.0, mm_to_meters(self.z_mm)),
            positions,
            normals,
            uvs,
            indices,
            aabb_min,
            aabb_max,
        }
    }

    /// Central-difference normal at the patch's own sample spacing:
    /// cross product of the x and z surface tangents.
    fn vertex_normal(&self, lx: i64, lz: i64, source: &dyn HeightSource) -> [f32; 3] {
        let x_mm = self.x_mm + lx * ONE_METER;
        let z_mm = self.z_mm + lz * ONE_METER;
        let step_mm = self.mps * ONE_METER;

        let h_left = source.height_point_mm(x_mm - step_mm, z_mm);
        let h_right = source.height_point_mm(x_mm + step_mm, z_mm);
        let h_north = source.height_point_mm(x_mm, z_mm - step_mm);
        let h_south = source.height_point_mm(x_mm, z_mm + step_mm);

        let span = (2 * self.mps) as f32;
        let tangent_x = Vec3::new(span, h_right - h_left, 0.0);
        let tangent_z = Vec3::new(0.0, h_south - h_north, span);
        tangent_z.cross(&tangent_x).normalized().to_array()
    }
}

/// Generate the full index buffer: uniform interior cells plus the
/// hand-built stitch patterns for the south strip, east strip, and
/// corner region.
///
/// Each legal LOD-ratio combination has its own fixed triangle sequence;
/// all triangles share the interior's winding, and every interior edge
/// ends up shared by exactly two triangles.
fn build_stitch_index_buffer(n: usize, south: EdgeRatio, east: EdgeRatio) -> Vec<u32> {
    let scount = border_count(n, south);
    let ecount = border_count(n, east);
    let body = |i: usize, j: usize| (j * n + i) as u32;
    let s = |k: usize| (n * n + k) as u32;
    let e = |k: usize| (n * n + scount + k) as u32;
    let corner = (n * n + scount + ecount) as u32;

    let mut indices = Vec::new();
    let mut tri = |a: u32, b: u32, c: u32| {
        indices.push(a);
        indices.push(b);
        indices.push(c);
    };

    // Interior cells, split along the NW-SE diagonal
    for j in 0..n - 1 {
        for i in 0..n - 1 {
            let tl = body(i, j);
            let tr = body(i + 1, j);
            let bl = body(i, j + 1);
            let br = body(i + 1, j + 1);
            tri(tl, bl, br);
            tri(tl, br, tr);
        }
    }

    // South strip: between interior row n-1 and the border row
    match south {
        EdgeRatio::Equal => {
            for k in 0..n - 1 {
                let i0 = body(k, n - 1);
                let i1 = body(k + 1, n - 1);
                tri(i0, s(k), s(k + 1));
                tri(i0, s(k + 1), i1);
            }
        }
        EdgeRatio::Finer => {
            for k in 0..n - 1 {
                let i0 = body(k, n - 1);
                let i1 = body(k + 1, n - 1);
                tri(i0, s(2 * k), s(2 * k + 1));
                tri(i0, s(2 * k + 1), i1);
                tri(i1, s(2 * k + 1), s(2 * k + 2));
            }
        }
        EdgeRatio::Coarser => {
            // Paired cells; the unpaired final cell folds into the corner
            for c in 0..n / 2 - 1 {
                let i0 = body(2 * c, n - 1);
                let im = body(2 * c + 1, n - 1);
                let i2 = body(2 * c + 2, n - 1);
                tri(i0, s(c), im);
                tri(im, s(c), s(c + 1));
                tri(im, s(c + 1), i2);
            }
        }
    }

    // East strip: between interior column n-1 and the border column
    match east {
        EdgeRatio::Equal => {
            for k in 0..n - 1 {
                let a = body(n - 1, k);
                let b = body(n - 1, k + 1);
                tri(a, b, e(k + 1));
                tri(a, e(k + 1), e(k));
            }
        }
        EdgeRatio::Finer => {
            for k in 0..n - 1 {
                let a = body(n - 1, k);
                let b = body(n - 1, k + 1);
                tri(a, b, e(2 * k + 1));
                tri(a, e(2 * k + 1), e(2 * k));
                tri(b, e(2 * k + 2), e(2 * k + 1));
            }
        }
        EdgeRatio::Coarser => {
            for c in 0..n / 2 - 1 {
                let a = body(n - 1, 2 * c);
                let m = body(n - 1, 2 * c + 1);
                let b = body(n - 1, 2 * c + 2);
                tri(a, m, e(c));
                tri(m, e(c + 1), e(c));
                tri(m, b, e(c + 1));
            }
        }
    }

    // Corner region. A coarser side extends the region one interior cell
    // back along its axis, which is how that neighbor comes to own the
    // triangles around the shared corner sample.
    let i_ = body(n - 1, n - 1);
    let a = body(n - 2, n - 1);
    let b = body(n - 1, n - 2);
    match (south, east) {
        (EdgeRatio::Equal, EdgeRatio::Equal) => {
            tri(i_, s(n - 1), corner);
            tri(i_, corner, e(n - 1));
        }
        (EdgeRatio::Finer, EdgeRatio::Equal) => {
            tri(i_, s(2 * n - 2), s(2 * n - 1));
            tri(i_, s(2 * n - 1), corner);
            tri(i_, corner, e(n - 1));
        }
        (EdgeRatio::Equal, EdgeRatio::Finer) => {
            tri(i_, s(n - 1), corner);
            tri(i_, corner, e(2 * n - 1));
            tri(i_, e(2 * n - 1), e(2 * n - 2));
        }
        (EdgeRatio::Finer, EdgeRatio::Finer) => {
            tri(i_, s(2 * n - 2), s(2 * n - 1));
            tri(i_, s(2 * n - 1), corner);
            tri(i_, corner, e(2 * n - 1));
            tri(i_, e(2 * n - 1), e(2 * n - 2));
        }
        (EdgeRatio::Coarser, EdgeRatio::Equal) => {
            let sc = s(n / 2 - 1);
            tri(sc, corner, e(n - 1));
            tri(sc, e(n - 1), i_);
            tri(sc, i_, a);
        }
        (EdgeRatio::Equal, EdgeRatio::Coarser) => {
            let ec = e(n / 2 - 1);
            tri(ec, b, i_);
            tri(ec, i_, s(n - 1));
            tri(ec, s(n - 1), corner);
        }
        (EdgeRatio::Coarser, EdgeRatio::Coarser) => {
            let sc = s(n / 2 - 1);
            let ec = e(n / 2 - 1);
            tri(i_, a, sc);
            tri(i_, sc, corner);
            tri(i_, corner, ec);
            tri(i_, ec, b);
        }
        (EdgeRatio::Finer, EdgeRatio::Coarser) => {
            let ec = e(n / 2 - 1);
            tri(ec, b, i_);
            tri(ec, i_, s(2 * n - 2));
            tri(ec, s(2 * n - 2), s(2 * n - 1));
            tri(ec, s(2 * n - 1), corner);
        }
        (EdgeRatio::Coarser, EdgeRatio::Finer) => {
            let sc = s(n / 2 - 1);
            tri(sc, corner, e(2 * n - 1));
            tri(sc, e(2 * n - 1), e(2 * n - 2));
            tri(sc, e(2 * n - 2), i_);
            tri(sc, i_, a);
        }
    }

    indices
}

/// Border row/column vertex count for one side of an `n`-cell patch.
fn border_count(n: usize, ratio: EdgeRatio) -> usize {
    match ratio {
        EdgeRatio::Equal => n,
        EdgeRatio::Finer => 2 * n,
        EdgeRatio::Coarser => n / 2,
    }
}
