//! Height sources: the terrain generators the cache sits in front of

use std::path::Path;

use basalt_core::{BasaltError, Result, ONE_METER};

/// A deterministic height generator.
///
/// The cache layer assumes repeated calls at the same world position
/// return the same value; implementations must be pure functions of
/// position with no observable side effects.
pub trait HeightSource {
    /// Height in meters at a world position given in fixed-point millimeters.
    fn height_point_mm(&self, x_mm: i64, z_mm: i64) -> f32;

    /// Fill `out` with an `n` x `n` row-major height field (`n` =
    /// `size_m / meters_per_sample`) whose sample (i, j) lies at
    /// `origin + (i, j) * meters_per_sample`. Returns (min, max) of the
    /// generated samples.
    fn fill_height_field(
        &self,
        x_mm: i64,
        z_mm: i64,
        size_m: i64,
        meters_per_sample: i64,
        out: &mut Vec<f32>,
    ) -> (f32, f32) {
        let n = (size_m / meters_per_sample) as usize;
        out.clear();
        out.reserve(n * n);

        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for j in 0..n {
            for i in 0..n {
                let h = self.height_point_mm(
                    x_mm + i as i64 * meters_per_sample * ONE_METER,
                    z_mm + j as i64 * meters_per_sample * ONE_METER,
                );
                min = min.min(h);
                max = max.max(h);
                out.push(h);
            }
        }
        (min, max)
    }
}

/// A procedural source: crossed sine waves over a base height.
///
/// Cheap, smooth, and fully deterministic; used by the demo CLI and the
/// test suite.
pub struct WaveHeightSource {
    /// Peak deviation from `base` in meters
    pub amplitude: f32,
    /// Wavelength in meters
    pub wavelength: f32,
    /// Base height in meters
    pub base: f32,
}

impl WaveHeightSource {
    pub fn new(amplitude: f32, wavelength: f32, base: f32) -> Self {
        Self {
            amplitude,
            wavelength,
            base,
        }
    }

    /// A zero-amplitude source: every sample is `base`.
    pub fn flat(base: f32) -> Self {
        Self::new(0.0, 1.0, base)
    }
}

impl HeightSource for WaveHeightSource {
    fn height_point_mm(&self, x_mm: i64, z_mm: i64) -> f32 {
        let x = x_mm as f64 / ONE_METER as f64;
        let z = z_mm as f64 / ONE_METER as f64;
        let k = std::f64::consts::TAU / self.wavelength as f64;
        let h = self.base as f64 + self.amplitude as f64 * (x * k).sin() * (z * k).cos();
        h as f32
    }
}

/// A height source backed by a grayscale heightmap image.
///
/// The image is stretched over a square world extent and tiled
/// (wrapped) outside it, with bilinear sampling between pixels.
pub struct HeightmapSource {
    /// Row-major height values normalized to [0..1]
    heights: Vec<f32>,
    width: u32,
    depth: u32,
    /// World extent of one image repeat in meters
    extent_m: f32,
    /// World height that a 1.0 pixel maps to, in meters
    height_scale: f32,
}

impl HeightmapSource {
    /// Load from a grayscale PNG. Values are normalized to [0..1]
    /// regardless of bit depth.
    pub fn from_png(path: &Path, extent_m: f32, height_scale: f32) -> Result<Self> {
        let img = image::open(path).map_err(|e| {
            BasaltError::HeightSourceError(format!(
                "failed to load heightmap '{}': {}",
                path.display(),
                e
            ))
        })?;

        let gray = img.into_luma16();
        let width = gray.width();
        let depth = gray.height();

        let heights: Vec<f32> = gray.pixels().map(|p| p.0[0] as f32 / 65535.0).collect();

        Ok(Self {
            heights,
            width,
            depth,
            extent_m,
            height_scale,
        })
    }

    /// Create from raw normalized data (for testing)
    pub fn from_raw(
        heights: Vec<f32>,
        width: u32,
        depth: u32,
        extent_m: f32,
        height_scale: f32,
    ) -> Self {
        assert_eq!(heights.len(), (width * depth) as usize);
        Self {
            heights,
            width,
            depth,
            extent_m,
            height_scale,
        }
    }

    fn get(&self, x: u32, z: u32) -> f32 {
        self.heights[(z % self.depth * self.width + x % self.width) as usize]
    }

    /// Bilinear sample at wrapped UV coordinates.
    fn sample(&self, u: f32, v: f32) -> f32 {
        let u = u.rem_euclid(1.0);
        let v = v.rem_euclid(1.0);

        let fx = u * self.width as f32;
        let fz = v * self.depth as f32;

        let x0 = fx as u32;
        let z0 = fz as u32;
        let tx = fx - x0 as f32;
        let tz = fz - z0 as f32;

        let h00 = self.get(x0, z0);
        let h10 = self.get(x0 + 1, z0);
        let h01 = self.get(x0, z0 + 1);
        let h11 = self.get(x0 + 1, z0 + 1);

        let h0 = h00 * (1.0 - tx) + h10 * tx;
        let h1 = h01 * (1.0 - tx) + h11 * tx;

        h0 * (1.0 - tz) + h1 * tz
    }
}

impl HeightSource for HeightmapSource {
    fn height_point_mm(&self, x_mm: i64, z_mm: i64) -> f32 {
        let u = x_mm as f64 / (self.extent_m as f64 * ONE_METER as f64);
        let v = z_mm as f64 / (self.extent_m as f64 * ONE_METER as f64);
        self.sample(u as f32, v as f32) * self.height_scale
    }
}
