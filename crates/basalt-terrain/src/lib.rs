//! Camera-relative paged terrain with multi-LOD height caching.
//!
//! The world is an unbounded height field addressed in fixed-point
//! millimeters. A square window of [`TerrainPage`]s stays centered on
//! the camera; each page carries a grid of [`SubPageHeightMap`] caches
//! that refine lazily toward the camera, and a grid of [`TerrainPatch`]
//! tiles that triangulate the cached heights with T-junction-free
//! stitching between neighboring LODs. [`TerrainManager`] owns the
//! window and drives the whole per-frame sequence.

pub mod config;
pub mod coord;
pub mod event;
pub mod height_source;
pub mod lod;
pub mod manager;
pub mod page;
pub mod page_height_map;
pub mod patch;
pub mod sub_page;

pub use config::TerrainConfig;
pub use coord::PageCoord;
pub use event::{EventBus, TerrainEvent};
pub use height_source::{HeightSource, HeightmapSource, WaveHeightSource};
pub use lod::{DefaultLodSpec, LodSpec};
pub use manager::{HeightLod, HeightMode, TerrainManager};
pub use page::TerrainPage;
pub use page_height_map::PageHeightMap;
pub use patch::{GeometryData, TerrainPatch};
pub use sub_page::SubPageHeightMap;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use basalt_core::ONE_METER;

    /// A policy that always wants maximum detail everywhere.
    struct MaxDetailSpec;

    impl LodSpec for MaxDetailSpec {
        fn page_size(&self) -> i64 {
            64
        }
        fn visible_page_radius(&self) -> i64 {
            1
        }
        fn tiles_per_page(&self, _pages_from_camera: i64) -> i64 {
            4
        }
        fn meters_per_sample(&self, _x: i64, _z: i64, _pages: i64, _subs: i64) -> i64 {
            1
        }
    }

    fn full_detail_manager() -> TerrainManager {
        let config = TerrainConfig {
            page_size: 64,
            sub_pages_per_page: 2,
            visible_page_radius: 1,
            min_meters_per_sample: 1,
            max_meters_per_sample: 4,
            max_scan_time_ms: 50,
        };
        TerrainManager::new(
            config,
            Box::new(MaxDetailSpec),
            Box::new(WaveHeightSource::new(6.0, 40.0, 15.0)),
        )
        .unwrap()
    }

    /// Height queries and built patch geometry come from the same
    /// source samples and the same diagonal split, so a query inside a
    /// rendered triangle must land exactly on the triangle's plane.
    #[test]
    fn queried_heights_lie_on_the_rendered_mesh() {
        let mut mgr = full_detail_manager();
        mgr.update_camera_mm(32_000, 32_000);

        let source = WaveHeightSource::new(6.0, 40.0, 15.0);
        // Build geometry for the camera tile and walk every triangle
        let (geo, patch_x, patch_z) = {
            let page = mgr.lookup_page_mut(32_000, 32_000).unwrap();
            let (px, pz) = page.patch_at(2, 2).location();
            (page.patch_geometry(2, 2, &source).clone(), px, pz)
        };

        for tri in geo.indices.chunks(3) {
            let a = geo.positions[tri[0] as usize];
            let b = geo.positions[tri[1] as usize];
            let c = geo.positions[tri[2] as usize];

            // Centroid of the triangle in world millimeters
            let cx = (a[0] + b[0] + c[0]) / 3.0;
            let cz = (a[2] + b[2] + c[2]) / 3.0;
            let plane_h = (a[1] + b[1] + c[1]) / 3.0;

            let wx = patch_x + (cx * ONE_METER as f32).round() as i64;
            let wz = patch_z + (cz * ONE_METER as f32).round() as i64;
            let queried =
                mgr.get_terrain_height(wx, wz, HeightMode::Interpolate, HeightLod::MaxLod);

            assert!(
                (queried - plane_h).abs() < 2e-2,
                "triangle at ({:.2}, {:.2}): mesh {} vs query {}",
                cx,
                cz,
                plane_h,
                queried
            );
        }
    }

    /// Vertices of a built patch reproduce the source exactly at max LOD.
    #[test]
    fn mesh_vertices_match_source_samples() {
        let mut mgr = full_detail_manager();
        mgr.update_camera_mm(0, 0);

        let source = WaveHeightSource::new(6.0, 40.0, 15.0);
        let (geo, patch_x, patch_z) = {
            let page = mgr.lookup_page_mut(0, 0).unwrap();
            let (px, pz) = page.patch_at(0, 0).location();
            (page.patch_geometry(0, 0, &source).clone(), px, pz)
        };

        for pos in &geo.positions {
            let wx = patch_x + (pos[0] * ONE_METER as f32).round() as i64;
            let wz = patch_z + (pos[2] * ONE_METER as f32).round() as i64;
            let direct = source.height_point_mm(wx, wz);
            assert_eq!(pos[1].to_bits(), direct.to_bits());
        }
    }

    /// End-to-end frame sequence: establish, move, validate, scan.
    #[test]
    fn frame_sequence_converges() {
        let mut mgr = full_detail_manager();

        mgr.update_camera_mm(0, 0);
        mgr.process_lod_changes();
        while mgr.lod_scan_pending() {
            mgr.process_lod_changes();
        }

        mgr.update_camera_mm(70_000, -3_000);
        mgr.process_lod_changes();
        while mgr.lod_scan_pending() {
            mgr.process_lod_changes();
        }

        // Camera is now in page (1, -1); every resident sub-page
        // reached full detail
        for pz in -2..=0 {
            for px in 0..=2 {
                let page = mgr
                    .lookup_page_by_index(px, pz)
                    .expect("window page missing");
                for sz in 0..2 {
                    for sx in 0..2 {
                        assert_eq!(page.height_map().sub_page(sx, sz).meters_per_sample(), 1);
                    }
                }
            }
        }
    }
}
