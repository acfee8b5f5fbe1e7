//! Terrain configuration

use std::fs;
use std::path::Path;

use basalt_core::{BasaltError, Result};
use serde::{Deserialize, Serialize};

/// Tunables for the terrain paging core, loadable from TOML.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Page size in meters (one unit of the camera-relative page grid)
    pub page_size: i64,
    /// Sub-page height caches per page edge
    pub sub_pages_per_page: i64,
    /// Page rings around the camera page that stay resident
    pub visible_page_radius: i64,
    /// Finest sample spacing in meters (power of two)
    pub min_meters_per_sample: i64,
    /// Coarsest sample spacing in meters (power-of-two multiple of the minimum)
    pub max_meters_per_sample: i64,
    /// Wall-clock budget for one LOD prediction scan slice, in milliseconds
    pub max_scan_time_ms: u64,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            page_size: 256,
            sub_pages_per_page: 4,
            visible_page_radius: 2,
            min_meters_per_sample: 1,
            max_meters_per_sample: 16,
            max_scan_time_ms: 50,
        }
    }
}

impl TerrainConfig {
    /// Parse a config from a TOML string, filling omitted fields with
    /// defaults and validating the result.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: TerrainConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Sub-page size in meters.
    pub fn sub_page_size(&self) -> i64 {
        self.page_size / self.sub_pages_per_page
    }

    /// Number of discrete LOD levels between max and min meters-per-sample.
    pub fn lod_levels(&self) -> u32 {
        (self.max_meters_per_sample / self.min_meters_per_sample).trailing_zeros() + 1
    }

    /// Check the structural requirements the core's invariants rest on.
    pub fn validate(&self) -> Result<()> {
        fn power_of_two(name: &str, v: i64) -> Result<()> {
            if v <= 0 || v & (v - 1) != 0 {
                return Err(BasaltError::ConfigError(format!(
                    "{} must be a positive power of two, got {}",
                    name, v
                )));
            }
            Ok(())
        }

        power_of_two("page_size", self.page_size)?;
        power_of_two("sub_pages_per_page", self.sub_pages_per_page)?;
        power_of_two("min_meters_per_sample", self.min_meters_per_sample)?;
        power_of_two("max_meters_per_sample", self.max_meters_per_sample)?;

        if !(1..=32).contains(&self.visible_page_radius) {
            return Err(BasaltError::ValueOutOfRange {
                field: "visible_page_radius".into(),
                min: 1,
                max: 32,
                value: self.visible_page_radius,
            });
        }
        if self.max_meters_per_sample < self.min_meters_per_sample {
            return Err(BasaltError::ConfigError(
                "max_meters_per_sample must be >= min_meters_per_sample".into(),
            ));
        }
        if self.sub_pages_per_page > self.page_size {
            return Err(BasaltError::ConfigError(
                "sub_pages_per_page must not exceed page_size".into(),
            ));
        }
        if self.sub_page_size() % self.max_meters_per_sample != 0 {
            return Err(BasaltError::ConfigError(format!(
                "sub-page size {} must be a multiple of max_meters_per_sample {}",
                self.sub_page_size(),
                self.max_meters_per_sample
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TerrainConfig::default().validate().is_ok());
        assert_eq!(TerrainConfig::default().sub_page_size(), 64);
        assert_eq!(TerrainConfig::default().lod_levels(), 5);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config = TerrainConfig::from_toml_str("page_size = 512\n").unwrap();
        assert_eq!(config.page_size, 512);
        assert_eq!(config.sub_pages_per_page, 4);
    }

    #[test]
    fn rejects_non_power_of_two() {
        let err = TerrainConfig::from_toml_str("max_meters_per_sample = 12\n");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_indivisible_sub_page() {
        let config = TerrainConfig {
            page_size: 64,
            sub_pages_per_page: 8,
            max_meters_per_sample: 16,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
