//! Error types for Basalt

use thiserror::Error;

/// The main error type for Basalt operations
#[derive(Debug, Error)]
pub enum BasaltError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Height source error: {0}")]
    HeightSourceError(String),

    #[error("Value out of range: {field} must be between {min} and {max}, got {value}")]
    ValueOutOfRange {
        field: String,
        min: i64,
        max: i64,
        value: i64,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),
}

/// Result type alias for Basalt operations
pub type Result<T> = std::result::Result<T, BasaltError>;

impl From<toml::de::Error> for BasaltError {
    fn from(err: toml::de::Error) -> Self {
        BasaltError::TomlParseError(err.to_string())
    }
}
