//! Basalt Core - Foundational types for the Basalt terrain engine
//!
//! This crate provides the types the other Basalt crates depend on:
//! - `Vec3` - Spatial math
//! - World-unit constants and conversions (fixed-point millimeters)
//! - Error types and Result alias

mod error;
mod types;
mod units;

pub use error::{BasaltError, Result};
pub use types::Vec3;
pub use units::{meters_to_mm, mm_to_meters, ONE_METER};
