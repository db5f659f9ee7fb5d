//! Resource domains wired onto the shared caches
//!
//! [`ResourceHub`] lives for the whole process and owns one cache per
//! domain. Every `*_coordinator()` call hands out a new consumer over the
//! same cache, so two consumers showing the same symbol share entries but
//! never each other's in-flight requests.

use crate::api::types::{CompanySummary, Holding};
use crate::api::ApiClient;
use crate::cache::{DurableStore, FreshnessPolicy, StorageLayout, TieredCache};
use crate::config::CacheConfig;
use crate::error::FetchError;
use crate::fetch::{FetchCoordinator, FetchMode};
use crate::signals::SignalAggregator;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Single key of the portfolio domain
pub const PORTFOLIO_KEY: &str = "portfolio";

/// Single key of the companies domain
pub const COMPANIES_KEY: &str = "companies";

/// Durable flag set once holdings have been fetched successfully
pub const PORTFOLIO_LOADED_KEY: &str = "portfolioLoaded";

fn analysis_storage_key(symbol: &str) -> String {
    format!("companyAnalysis:{}", symbol)
}

fn portfolio_storage_key(_: &str) -> String {
    "portfolioData".to_string()
}

fn companies_storage_key(_: &str) -> String {
    "research_companies_cache".to_string()
}

fn companies_timestamp_key(_: &str) -> String {
    "research_companies_cache_timestamp".to_string()
}

pub struct ResourceHub {
    api: ApiClient,
    durable: Arc<dyn DurableStore>,
    analysis: Arc<TieredCache<Value>>,
    portfolio: Arc<TieredCache<Vec<Holding>>>,
    companies: Arc<TieredCache<Vec<CompanySummary>>>,
    analysis_policy: FreshnessPolicy,
}

impl ResourceHub {
    pub fn new(api: ApiClient, durable: Arc<dyn DurableStore>, config: &CacheConfig) -> Self {
        let mut analysis = TieredCache::new(
            Arc::clone(&durable),
            StorageLayout::Envelope(analysis_storage_key),
        );
        if let Some(capacity) = config.memory_capacity {
            analysis = analysis.with_capacity(capacity);
        }

        let portfolio = TieredCache::new(
            Arc::clone(&durable),
            StorageLayout::Envelope(portfolio_storage_key),
        );
        let companies = TieredCache::new(
            Arc::clone(&durable),
            StorageLayout::Split {
                data: companies_storage_key,
                timestamp: companies_timestamp_key,
            },
        );

        Self {
            api,
            durable,
            analysis: Arc::new(analysis),
            portfolio: Arc::new(portfolio),
            companies: Arc::new(companies),
            analysis_policy: FreshnessPolicy::StaleAfter(config.analysis_stale_after),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Company analysis keyed by normalized symbol, stale after the
    /// configured threshold
    pub fn analysis_coordinator(&self) -> FetchCoordinator<Value> {
        let api = self.api.clone();
        FetchCoordinator::new(
            "company analysis",
            Arc::clone(&self.analysis),
            move |symbol: String, _mode: FetchMode| {
                let api = api.clone();
                async move { api.thesis(&symbol).await }
            },
            self.analysis_policy,
        )
    }

    /// Brokerage holdings under [`PORTFOLIO_KEY`]. Cached until refreshed;
    /// a refresh also asks the bridge to bypass its own cache.
    pub fn portfolio_coordinator(&self) -> FetchCoordinator<Vec<Holding>> {
        let api = self.api.clone();
        let durable = Arc::clone(&self.durable);
        FetchCoordinator::new(
            "portfolio",
            Arc::clone(&self.portfolio),
            move |_key: String, mode: FetchMode| {
                let api = api.clone();
                let durable = Arc::clone(&durable);
                async move {
                    let holdings = api.holdings(mode == FetchMode::Refresh).await?;
                    if let Err(err) = durable.write(PORTFOLIO_LOADED_KEY, "true") {
                        debug!(error = %err, "Failed to persist portfolio loaded flag");
                    }
                    Ok::<_, FetchError>(holdings)
                }
            },
            FreshnessPolicy::UntilRefreshed,
        )
    }

    /// Research companies list under [`COMPANIES_KEY`], cached until refreshed
    pub fn companies_coordinator(&self) -> FetchCoordinator<Vec<CompanySummary>> {
        let api = self.api.clone();
        FetchCoordinator::new(
            "companies",
            Arc::clone(&self.companies),
            move |_key: String, _mode: FetchMode| {
                let api = api.clone();
                async move { api.companies().await }
            },
            FreshnessPolicy::UntilRefreshed,
        )
    }

    pub fn signal_aggregator(&self) -> SignalAggregator {
        SignalAggregator::new(Arc::new(self.api.clone()))
    }

    /// True once holdings were fetched successfully in this or an earlier
    /// process
    pub fn portfolio_loaded(&self) -> bool {
        matches!(
            self.durable.read(PORTFOLIO_LOADED_KEY),
            Ok(Some(flag)) if flag == "true"
        )
    }
}
