//! Company signals: news sentiment, corporate events and earnings calls
//!
//! Several independent sources are loaded together into one
//! [`SignalBundle`]. A failing source never hides the ones that loaded.

pub mod aggregator;

pub use aggregator::{BundleState, SignalAggregator};

use crate::api::types::{ConferenceCall, NewsResponse};
use crate::error::FetchError;
use crate::symbol::capitalize;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Conference calls summarized per bundle
pub const MAX_CALL_SUMMARIES: usize = 3;

/// Fixed news look-back windows, shortest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NewsWindow {
    #[serde(rename = "last-1-day")]
    LastDay,
    #[serde(rename = "last-7-days")]
    LastWeek,
    #[serde(rename = "last-30-days")]
    LastMonth,
}

impl NewsWindow {
    pub const ALL: [NewsWindow; 3] = [NewsWindow::LastDay, NewsWindow::LastWeek, NewsWindow::LastMonth];

    /// URL path segment
    pub fn path(self) -> &'static str {
        match self {
            NewsWindow::LastDay => "last-1-day",
            NewsWindow::LastWeek => "last-7-days",
            NewsWindow::LastMonth => "last-30-days",
        }
    }

    /// Source name shown when this window fails to load
    pub fn label(self) -> &'static str {
        match self {
            NewsWindow::LastDay => "1-day news",
            NewsWindow::LastWeek => "7-day news",
            NewsWindow::LastMonth => "30-day news",
        }
    }
}

/// News sentiment, canonicalized onto a closed set where possible
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sentiment {
    Positive,
    Negative,
    Mixed,
    Neutral,
    /// Label outside the closed set, capitalized
    Other(String),
}

impl Sentiment {
    /// Case-insensitive match onto the closed set. Empty input is neutral.
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            "mixed" => Sentiment::Mixed,
            "neutral" | "" => Sentiment::Neutral,
            _ => Sentiment::Other(capitalize(trimmed)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
            Sentiment::Mixed => "Mixed",
            Sentiment::Neutral => "Neutral",
            Sentiment::Other(label) => label,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Sentiment {
    fn from(raw: String) -> Self {
        Sentiment::normalize(&raw)
    }
}

impl From<Sentiment> for String {
    fn from(sentiment: Sentiment) -> Self {
        sentiment.as_str().to_string()
    }
}

/// News summary for one window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsDigest {
    pub summary: String,
    pub sentiment: Sentiment,
}

impl From<NewsResponse> for NewsDigest {
    fn from(response: NewsResponse) -> Self {
        Self {
            summary: response.news_summary,
            sentiment: Sentiment::normalize(&response.sentiment),
        }
    }
}

/// Summary of one earnings conference call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSummary {
    pub fiscal_year: i32,
    pub fiscal_quarter: String,
    pub summary: String,
}

/// Combined result of one signals load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalBundle {
    pub symbol: String,
    /// Windows that loaded; failed windows are absent
    pub news: BTreeMap<NewsWindow, NewsDigest>,
    /// `None` when the corporate events source failed
    pub corporate_events: Option<Vec<Value>>,
    /// Newest first; empty when the company has no calls on record
    pub conference_calls: Vec<CallSummary>,
    /// Labels of failed sources, in source order
    pub failed_sources: Vec<String>,
}

impl SignalBundle {
    /// One informational line naming every failed source
    pub fn error_message(&self) -> Option<String> {
        if self.failed_sources.is_empty() {
            return None;
        }
        Some(format!(
            "Some data could not be loaded: {}",
            self.failed_sources.join(", ")
        ))
    }

    pub fn is_complete(&self) -> bool {
        self.failed_sources.is_empty()
    }
}

/// Per-key lifecycle; a key is fanned out at most once until reset
#[derive(Debug, Clone, PartialEq)]
pub enum BundlePhase {
    Idle,
    Loading,
    Loaded(Arc<SignalBundle>),
}

/// Outcome of [`SignalAggregator::load_bundle`]
#[derive(Debug, Clone, PartialEq)]
pub enum BundleLoad {
    /// Activation gate closed; nothing was requested
    Inactive,
    /// Another call is already loading this key
    InProgress,
    Ready(Arc<SignalBundle>),
}

/// Network side of the signals domain
pub trait SignalSource: Send + Sync {
    fn news(&self, symbol: &str, window: NewsWindow) -> BoxFuture<'static, Result<NewsResponse, FetchError>>;

    fn corporate_events(&self, symbol: &str) -> BoxFuture<'static, Result<Vec<Value>, FetchError>>;

    fn conference_calls(
        &self,
        company_id: &str,
    ) -> BoxFuture<'static, Result<Vec<ConferenceCall>, FetchError>>;

    fn call_summary(
        &self,
        company_id: &str,
        call: &ConferenceCall,
    ) -> BoxFuture<'static, Result<String, FetchError>>;
}
