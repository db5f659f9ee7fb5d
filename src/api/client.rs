//! Backend HTTP client
//!
//! Wraps reqwest with the configured base URL, request timeout and a shared
//! client-side rate limiter. Every method maps failures onto [`FetchError`].

use super::rate_limiter::RateLimiter;
use super::types::{
    extract_url, normalize_holdings, CallSummaryResponse, CompaniesResponse, CompanySummary,
    ConferenceCall, ConferenceCallsResponse, CorporateEventsResponse, Holding, LoginResponse,
    NewsResponse,
};
use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::signals::{NewsWindow, SignalSource};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts for the holdings call before giving up
const HOLDINGS_MAX_ATTEMPTS: u32 = 3;

/// Financial statement flavours, tried in order
const FINANCIAL_STATEMENTS: [&str; 2] = ["standalone", "consolidated"];

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    retry_base: Duration,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("investr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            limiter: Arc::new(RateLimiter::per_minute(config.rate_limit)),
            retry_base: Duration::from_secs(1),
        })
    }

    /// Overrides the first retry delay (doubled on every further attempt)
    pub fn with_retry_base(mut self, delay: Duration) -> Self {
        self.retry_base = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path`, which must start with `/`
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        self.limiter
            .wait()
            .await
            .map_err(|e| FetchError::RateLimited(e.to_string()))?;

        let url = self.endpoint(path);
        debug!(url = %url, "GET");
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Brokerage login URL from the bridge
    ///
    /// Falls back to scanning the body for a URL when the bridge replies
    /// with prose instead of `{"login_url": ...}`.
    pub async fn login_url(&self) -> Result<String, FetchError> {
        let value: Value = self.get_json("/api/mcp/login").await?;

        if let Ok(login) = serde_json::from_value::<LoginResponse>(value.clone()) {
            if let Some(url) = extract_url(&login.login_url) {
                return Ok(url);
            }
        }

        let text = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        extract_url(&text)
            .ok_or_else(|| FetchError::Malformed("No login URL in bridge response".to_string()))
    }

    /// Brokerage holdings; `refresh` asks the bridge to bypass its own cache
    ///
    /// Retries transport errors, 429 and 5xx with exponential backoff.
    pub async fn holdings(&self, refresh: bool) -> Result<Vec<Holding>, FetchError> {
        let path = if refresh {
            "/api/mcp/holdings?refresh=true"
        } else {
            "/api/mcp/holdings"
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_json::<Value>(path).await {
                Ok(value) => return Ok(normalize_holdings(value)),
                Err(err) if err.is_retryable() && attempt < HOLDINGS_MAX_ATTEMPTS => {
                    let delay = self.retry_base * 2_u32.pow(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = HOLDINGS_MAX_ATTEMPTS,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Holdings request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Investment thesis for `symbol`; the payload is passed through as is
    pub async fn thesis(&self, symbol: &str) -> Result<Value, FetchError> {
        self.get_json(&format!("/api/thesis/{}", symbol)).await
    }

    pub async fn news(&self, symbol: &str, window: NewsWindow) -> Result<NewsResponse, FetchError> {
        self.get_json(&format!("/companies/{}/news/{}/", symbol, window.path()))
            .await
    }

    pub async fn corporate_events(&self, symbol: &str) -> Result<Vec<Value>, FetchError> {
        let response: CorporateEventsResponse = self
            .get_json(&format!("/api/corporate-events/{}", symbol))
            .await?;
        Ok(response.events)
    }

    pub async fn conference_calls(&self, company_id: &str) -> Result<Vec<ConferenceCall>, FetchError> {
        let response: ConferenceCallsResponse = self
            .get_json(&format!("/companies/{}/conference-calls/details/", company_id))
            .await?;
        Ok(response.conference_calls)
    }

    pub async fn call_summary(
        &self,
        company_id: &str,
        call: &ConferenceCall,
    ) -> Result<String, FetchError> {
        let response: CallSummaryResponse = self
            .get_json(&format!(
                "/companies/{}/conference-calls/{}/{}/summary/",
                company_id, call.fiscal_year, call.fiscal_quarter
            ))
            .await?;
        Ok(response.summary)
    }

    /// Companies with published research
    pub async fn companies(&self) -> Result<Vec<CompanySummary>, FetchError> {
        let response: CompaniesResponse = self.get_json("/api/companies").await?;
        Ok(response.companies)
    }

    /// Financial statements for `symbol`, standalone first, then
    /// consolidated. `None` when neither is available.
    pub async fn financials(&self, symbol: &str) -> Result<Option<Value>, FetchError> {
        for statement in FINANCIAL_STATEMENTS {
            let path = format!("/companies/{}/financials/{}", symbol, statement);
            match self.get_json::<Value>(&path).await {
                Ok(value) => {
                    debug!(symbol = %symbol, statement, "Financials found");
                    return Ok(Some(value));
                }
                Err(err @ FetchError::RateLimited(_)) => return Err(err),
                Err(err) => {
                    debug!(symbol = %symbol, statement, error = %err, "Financials unavailable");
                }
            }
        }
        Ok(None)
    }
}

impl SignalSource for ApiClient {
    fn news(&self, symbol: &str, window: NewsWindow) -> BoxFuture<'static, Result<NewsResponse, FetchError>> {
        let client = self.clone();
        let symbol = symbol.to_string();
        Box::pin(async move { ApiClient::news(&client, &symbol, window).await })
    }

    fn corporate_events(&self, symbol: &str) -> BoxFuture<'static, Result<Vec<Value>, FetchError>> {
        let client = self.clone();
        let symbol = symbol.to_string();
        Box::pin(async move { ApiClient::corporate_events(&client, &symbol).await })
    }

    fn conference_calls(
        &self,
        company_id: &str,
    ) -> BoxFuture<'static, Result<Vec<ConferenceCall>, FetchError>> {
        let client = self.clone();
        let company_id = company_id.to_string();
        Box::pin(async move { ApiClient::conference_calls(&client, &company_id).await })
    }

    fn call_summary(
        &self,
        company_id: &str,
        call: &ConferenceCall,
    ) -> BoxFuture<'static, Result<String, FetchError>> {
        let client = self.clone();
        let company_id = company_id.to_string();
        let call = call.clone();
        Box::pin(async move { ApiClient::call_summary(&client, &company_id, &call).await })
    }
}
