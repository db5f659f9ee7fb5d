use thiserror::Error;

/// Failure of a single network fetch.
///
/// `Superseded` is not a user-facing failure: it marks a request that was
/// cancelled because a newer request for the same key replaced it, or the
/// consumer that issued it went away. Callers drop it silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request superseded")]
    Superseded,

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),
}

impl FetchError {
    pub fn is_superseded(&self) -> bool {
        matches!(self, FetchError::Superseded)
    }

    /// Transport errors, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::RateLimited(_) => true,
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Http { status: 404, .. })
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            FetchError::Superseded => "superseded",
            FetchError::Http { .. } => "http_error",
            FetchError::Transport(_) => "transport_error",
            FetchError::Malformed(_) => "malformed_payload",
            FetchError::RateLimited(_) => "rate_limit",
        }
    }

    /// Generic message shown to the consumer instead of the raw error.
    pub fn user_message(&self, resource: &str) -> String {
        match self {
            FetchError::RateLimited(_) => {
                format!("Too many requests while loading {}. Please wait a moment.", resource)
            }
            _ => format!("Failed to load {}. Please try again.", resource),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let url = err.url().map(|u| u.to_string()).unwrap_or_default();
            return FetchError::Http {
                status: status.as_u16(),
                url,
            };
        }
        if err.is_timeout() {
            FetchError::Transport("Request timed out".to_string())
        } else if err.is_connect() {
            FetchError::Transport("Failed to connect to backend".to_string())
        } else if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(format!("JSON parsing failed: {}", err))
    }
}

/// Durable cache tier failure. Never fatal; the cache degrades to the
/// process-lifetime tier.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
