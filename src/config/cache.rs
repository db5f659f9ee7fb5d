//! Cache Configuration

use super::api::parse_positive;
use crate::cache::ANALYSIS_STALE_THRESHOLD;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

/// Cache tier configuration
///
/// ## Environment Variables
///
/// - `CACHE_PATH`: Directory of the durable tier (default: ./data/cache)
/// - `ANALYSIS_STALE_SECS`: Staleness threshold for analysis payloads (default: 300)
/// - `MEMORY_CACHE_CAPACITY`: Bound on the process-lifetime tier (default: unbounded)
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub analysis_stale_after: Duration,
    pub memory_capacity: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/cache"),
            analysis_stale_after: ANALYSIS_STALE_THRESHOLD,
            memory_capacity: None,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let path = lookup("CACHE_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.path);

        let analysis_stale_after = match lookup("ANALYSIS_STALE_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("ANALYSIS_STALE_SECS", &raw)?),
            None => defaults.analysis_stale_after,
        };

        let memory_capacity = match lookup("MEMORY_CACHE_CAPACITY") {
            Some(raw) => Some(parse_positive("MEMORY_CACHE_CAPACITY", &raw)? as usize),
            None => None,
        };

        Ok(Self {
            path,
            analysis_stale_after,
            memory_capacity,
        })
    }
}
