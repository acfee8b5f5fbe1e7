//! Subcommand implementations

use std::fs;
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use basalt_core::{Vec3, ONE_METER};
use basalt_terrain::{
    DefaultLodSpec, HeightLod, HeightMode, HeightSource, HeightmapSource, TerrainConfig,
    TerrainEvent, TerrainManager, WaveHeightSource,
};

/// Height source and config selection shared by the sampling commands.
pub struct SourceArgs {
    pub config: Option<String>,
    pub heightmap: Option<String>,
    pub extent: i64,
    pub height_scale: f32,
}

fn load_config(path: Option<&str>) -> Result<TerrainConfig> {
    match path {
        Some(path) => TerrainConfig::from_file(Path::new(path))
            .with_context(|| format!("loading config '{}'", path)),
        None => Ok(TerrainConfig::default()),
    }
}

fn build_manager(args: &SourceArgs) -> Result<TerrainManager> {
    let config = load_config(args.config.as_deref())?;
    let source: Box<dyn HeightSource> = match &args.heightmap {
        Some(path) => Box::new(
            HeightmapSource::from_png(Path::new(path), args.extent as f32, args.height_scale)?,
        ),
        None => Box::new(WaveHeightSource::new(12.0, 180.0, 30.0)),
    };
    let lod_spec = DefaultLodSpec::new(&config);
    Ok(TerrainManager::new(config, Box::new(lod_spec), source)?)
}

pub fn check(path: &str) -> Result<()> {
    let config = TerrainConfig::from_file(Path::new(path))
        .with_context(|| format!("loading config '{}'", path))?;
    println!("config ok: {:#?}", config);
    Ok(())
}

pub fn sample(args: SourceArgs, x: f32, z: f32) -> Result<()> {
    let mut mgr = build_manager(&args)?;
    mgr.update_camera(Vec3::new(x, 0.0, z));

    let x_mm = (x * ONE_METER as f32).round() as i64;
    let z_mm = (z * ONE_METER as f32).round() as i64;

    let interpolated =
        mgr.get_terrain_height(x_mm, z_mm, HeightMode::Interpolate, HeightLod::MaxLod);
    let closest = mgr.get_terrain_height(x_mm, z_mm, HeightMode::Closest, HeightLod::MaxLod);
    let normal = mgr.get_normal_at(x_mm, z_mm);

    println!("position:     ({:.3}, {:.3})", x, z);
    println!("height:       {:.4} m (interpolated)", interpolated);
    println!("height:       {:.4} m (closest sample)", closest);
    println!(
        "normal:       ({:.4}, {:.4}, {:.4})",
        normal.x, normal.y, normal.z
    );
    if let Some(sub) = mgr.lookup_sub_page(x_mm, z_mm) {
        println!("sample grid:  {} m (cached)", sub.meters_per_sample());
    }
    Ok(())
}

pub fn fly(args: SourceArgs, distance: i64, step: i64) -> Result<()> {
    anyhow::ensure!(step > 0, "step must be positive");

    let mut mgr = build_manager(&args)?;
    let mut shifts = 0usize;
    let mut frames = 0usize;

    let mut x = 0i64;
    while x <= distance {
        mgr.update_camera_mm(x * ONE_METER, 0);
        mgr.process_lod_changes();

        for event in mgr.drain_events() {
            match event {
                TerrainEvent::PageShifted { dx, dz } => {
                    shifts += 1;
                    info!("frame {}: page array shifted by ({}, {})", frames, dx, dz);
                }
                TerrainEvent::PageVisible { page_x, page_z } => {
                    info!("frame {}: page ({}, {}) entered view", frames, page_x, page_z);
                }
                TerrainEvent::PageHidden { page_x, page_z } => {
                    info!("frame {}: page ({}, {}) left view", frames, page_x, page_z);
                }
                _ => {}
            }
        }

        frames += 1;
        x += step;
    }

    let h = mgr.get_terrain_height(
        distance * ONE_METER,
        0,
        HeightMode::Interpolate,
        HeightLod::MaxLod,
    );
    println!(
        "flew {} m in {} frames: {} page shifts, final height {:.3} m",
        distance, frames, shifts, h
    );
    Ok(())
}

pub fn export(args: SourceArgs, x: f32, z: f32, output: &str) -> Result<()> {
    let mut mgr = build_manager(&args)?;
    mgr.update_camera(Vec3::new(x, 0.0, z));

    let x_mm = (x * ONE_METER as f32).round() as i64;
    let z_mm = (z * ONE_METER as f32).round() as i64;

    let (loc_x, loc_z) = mgr
        .lookup_page(x_mm, z_mm)
        .context("position is outside the resident page window")?
        .location();
    let (vertices, triangles) = mgr
        .page_trimesh(x_mm, z_mm)
        .context("position is outside the resident page window")?;

    let mut file = fs::File::create(output)
        .with_context(|| format!("creating '{}'", output))?;
    writeln!(
        file,
        "# basalt terrain page at ({}, {}) m",
        loc_x / ONE_METER,
        loc_z / ONE_METER
    )?;
    for v in &vertices {
        writeln!(file, "v {} {} {}", v[0], v[1], v[2])?;
    }
    for t in &triangles {
        // OBJ indices are 1-based
        writeln!(file, "f {} {} {}", t[0] + 1, t[1] + 1, t[2] + 1)?;
    }

    println!(
        "wrote {} vertices, {} triangles to {}",
        vertices.len(),
        triangles.len(),
        output
    );
    Ok(())
}
