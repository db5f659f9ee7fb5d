// Library exports for investr

pub mod api; // Bridge and financial-data backend client
pub mod cache; // Two-tier cache and freshness policy
pub mod config; // Configuration management
pub mod error;
pub mod fetch; // Fetch coordination with supersession
pub mod resources; // Per-domain caches and consumers
pub mod signals; // Partial-failure signals aggregator
pub mod symbol;
