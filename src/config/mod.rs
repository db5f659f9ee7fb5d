//! Configuration Management
//!
//! Loads backend and cache settings from environment variables.

pub mod api;
pub mod cache;

pub use api::ApiConfig;
pub use cache::CacheConfig;

use crate::error::ConfigError;

/// Complete process configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub cache: CacheConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api: ApiConfig::from_env()?,
            cache: CacheConfig::from_env()?,
        })
    }
}
