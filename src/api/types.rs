//! Wire types for the bridge and financial-data backend
//!
//! Payload schemas belong to the backend; only the fields the crate reads
//! are typed, everything else passes through as `serde_json::Value`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One brokerage holding row, columns as the bridge reports them
pub type Holding = Map<String, Value>;

/// Response from `GET /api/mcp/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub login_url: String,
}

/// Response from `GET /companies/{symbol}/news/{window}/`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsResponse {
    #[serde(default)]
    pub news_summary: String,
    #[serde(default)]
    pub sentiment: String,
}

/// Response from `GET /api/corporate-events/{symbol}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorporateEventsResponse {
    #[serde(default)]
    pub events: Vec<Value>,
}

/// Response from `GET /companies/{id}/conference-calls/details/`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConferenceCallsResponse {
    #[serde(default)]
    pub conference_calls: Vec<ConferenceCall>,
}

/// Conference call metadata; the backend sends year and quarter either as
/// numbers or strings ("2024", "Q3", 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceCall {
    #[serde(deserialize_with = "number_from_any")]
    pub fiscal_year: i32,
    #[serde(deserialize_with = "string_from_any")]
    pub fiscal_quarter: String,
}

impl ConferenceCall {
    /// Numeric quarter extracted from `fiscal_quarter`, 0 if none
    pub fn quarter_number(&self) -> u32 {
        let digits: String = self
            .fiscal_quarter
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        digits.parse().unwrap_or(0)
    }
}

/// The `limit` most recent calls, newest first
pub fn most_recent(calls: &[ConferenceCall], limit: usize) -> Vec<ConferenceCall> {
    let mut sorted = calls.to_vec();
    sorted.sort_by(|a, b| {
        (b.fiscal_year, b.quarter_number()).cmp(&(a.fiscal_year, a.quarter_number()))
    });
    sorted.truncate(limit);
    sorted
}

/// Response from `GET /companies/{id}/conference-calls/{year}/{quarter}/summary/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSummaryResponse {
    pub summary: String,
}

/// Response from `GET /api/companies`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompaniesResponse {
    #[serde(default)]
    pub companies: Vec<CompanySummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanySummary {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
}

fn number_from_any<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("fiscal year out of range: {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid fiscal year: {:?}", s))),
        other => Err(serde::de::Error::custom(format!(
            "expected number or string, got {}",
            other
        ))),
    }
}

fn string_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected number or string, got {}",
            other
        ))),
    }
}

/// Flattens the shapes the holdings endpoint has been seen to return:
/// `{"holdings": [...]}`, a bare list, a single object, or any of those
/// encoded as a JSON string.
pub fn normalize_holdings(value: Value) -> Vec<Holding> {
    match value {
        Value::Object(mut obj) => match obj.remove("holdings") {
            Some(inner) => normalize_holdings(inner),
            None => vec![obj],
        },
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(obj) => Some(obj),
                _ => None,
            })
            .collect(),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed @ (Value::Object(_) | Value::Array(_))) => normalize_holdings(parsed),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// First HTTP(S) URL in free text, preferring one introduced by `URL:`
pub fn extract_url(text: &str) -> Option<String> {
    if let Some(pos) = text.find("URL:") {
        let rest = text[pos + 4..].trim_start();
        if rest.starts_with("http://") || rest.starts_with("https://") {
            return Some(take_url(rest));
        }
    }

    let start = match (text.find("https://"), text.find("http://")) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return None,
    };
    Some(take_url(&text[start..]))
}

fn take_url(text: &str) -> String {
    text.chars()
        .take_while(|c| c.is_alphanumeric() || "_-./?=&%:".contains(*c))
        .collect::<String>()
        .trim_end_matches(['.', ':'])
        .to_string()
}
