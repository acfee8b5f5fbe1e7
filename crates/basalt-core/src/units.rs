//! World-space units
//!
//! Terrain world coordinates are fixed-point millimeters stored as `i64`,
//! so page and sample origins are exact regardless of distance from the
//! world origin. Heights and render-facing positions are `f32` meters.

/// Millimeters per meter: the fixed-point scale of world coordinates.
pub const ONE_METER: i64 = 1000;

/// Convert fixed-point millimeters to floating-point meters.
pub fn mm_to_meters(mm: i64) -> f32 {
    mm as f32 / ONE_METER as f32
}

/// Convert floating-point meters to fixed-point millimeters (rounded).
pub fn meters_to_mm(meters: f32) -> i64 {
    (meters * ONE_METER as f32).round() as i64
}
