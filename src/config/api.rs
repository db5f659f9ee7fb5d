//! Backend API Configuration
//!
//! Target host and request limits for the bridge / financial-data backend.

use crate::error::ConfigError;
use std::time::Duration;

/// Backend used when `API_BASE_URL` is absent.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Backend API configuration
///
/// ## Environment Variables
///
/// - `API_BASE_URL`: Backend host (default: http://localhost:8000)
/// - `API_TIMEOUT_SECS`: Per-request timeout in seconds (default: 30)
/// - `API_RATE_LIMIT`: Requests per minute issued by this process (default: 600)
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    /// Base URL without trailing slash
    pub base_url: String,

    /// Transport timeout for a single request
    pub timeout: Duration,

    /// Client-side rate limit, requests per minute
    pub rate_limit: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            rate_limit: 600,
        }
    }
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load API configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let base_url = lookup("API_BASE_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.base_url);

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                var: "API_BASE_URL",
                value: base_url,
                reason: "must start with http:// or https://".to_string(),
            });
        }

        let timeout = match lookup("API_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("API_TIMEOUT_SECS", &raw)?),
            None => defaults.timeout,
        };

        let rate_limit = match lookup("API_RATE_LIMIT") {
            Some(raw) => parse_positive("API_RATE_LIMIT", &raw)? as u32,
            None => defaults.rate_limit,
        };

        Ok(Self {
            base_url,
            timeout,
            rate_limit,
        })
    }
}

pub(crate) fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 && v <= u32::MAX as u64 => Ok(v),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "expected a positive integer".to_string(),
        }),
    }
}
