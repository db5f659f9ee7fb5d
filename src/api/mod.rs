//! HTTP access to the brokerage bridge and the financial-data backend

pub mod client;
pub mod rate_limiter;
pub mod types;

pub use client::ApiClient;
pub use rate_limiter::{RateLimiter, RateLimiterError};
pub use types::{CompanySummary, ConferenceCall, Holding, NewsResponse};
