//! Facilities for reading runtime configuration values
use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Largest accepted streaming buffer
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Extraction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    /// Size of the buffer used to stream entry data
    #[serde(default = "ExtractConfig::default_chunk_size")]
    pub chunk_size: usize,
    /// Single entry decompressed limit (unlimited if not set)
    #[serde(default)]
    pub max_entry_output_size: Option<u64>,
    /// Whether to restore modification times and permissions
    #[serde(default = "ExtractConfig::default_restore_attributes")]
    pub restore_attributes: bool,
    /// Password used for encrypted entries, unless one is set explicitly
    #[serde(default)]
    pub password: Option<String>,
    /// Whether batch extraction stops at the first failed entry
    #[serde(default)]
    pub stop_on_error: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            chunk_size: Self::default_chunk_size(),
            max_entry_output_size: None,
            restore_attributes: Self::default_restore_attributes(),
            password: None,
            stop_on_error: false,
        }
    }
}

impl ExtractConfig {
    /// Loads the configuration from `extract.toml` and `EXTRACT__*` environment variables
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("extract.toml"))
                .merge(Env::prefixed("EXTRACT__").split("__")),
        )
    }

    /// Extracts and validates the configuration from the given sources
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|err| {
            error!("Failed to validate configuration: {}", err);
            Box::new(err)
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "Value of `chunk_size` must be between 1 and {MAX_CHUNK_SIZE}"
            )));
        }
        if let Some(limit) = self.max_entry_output_size {
            if limit >= i64::MAX as u64 {
                return Err(ConfigError::Invalid(format!(
                    "Value of `max_entry_output_size` is too large (must be strictly < {})",
                    i64::MAX
                )));
            }
        }
        Ok(())
    }

    /// Returns a default chunk size value
    fn default_chunk_size() -> usize {
        64 * 1024
    }

    /// Returns a default attribute restoration value
    fn default_restore_attributes() -> bool {
        true
    }
}
