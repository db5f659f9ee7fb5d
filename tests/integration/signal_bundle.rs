use futures::future::{pending, BoxFuture};
use investr::api::types::{ConferenceCall, NewsResponse};
use investr::error::FetchError;
use investr::signals::{BundleLoad, BundlePhase, NewsWindow, Sentiment, SignalAggregator, SignalSource};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source with per-test failures. Conference call details are absent
/// (HTTP 404) unless `calls` is set.
#[derive(Default)]
struct ScriptedSource {
    failing_windows: Vec<NewsWindow>,
    events_fail: bool,
    calls: Option<Vec<ConferenceCall>>,
    failing_summaries: Vec<i32>,
    /// News for this symbol never resolves
    hang_symbol: Option<&'static str>,
    /// While set, news for every symbol never resolves
    stalled: AtomicBool,
    news_started: AtomicUsize,
}

fn http(status: u16, path: &str) -> FetchError {
    FetchError::Http {
        status,
        url: format!("http://localhost:8000{}", path),
    }
}

fn call(fiscal_year: i32, fiscal_quarter: &str) -> ConferenceCall {
    ConferenceCall {
        fiscal_year,
        fiscal_quarter: fiscal_quarter.to_string(),
    }
}

impl SignalSource for ScriptedSource {
    fn news(&self, symbol: &str, window: NewsWindow) -> BoxFuture<'static, Result<NewsResponse, FetchError>> {
        self.news_started.fetch_add(1, Ordering::SeqCst);
        if self.hang_symbol == Some(symbol) || self.stalled.load(Ordering::SeqCst) {
            return Box::pin(pending());
        }
        let result = if self.failing_windows.contains(&window) {
            Err(http(500, window.path()))
        } else {
            Ok(NewsResponse {
                news_summary: format!("{} news over {}", symbol, window.path()),
                sentiment: match window {
                    NewsWindow::LastDay => "POSITIVE".to_string(),
                    NewsWindow::LastWeek => "mixed".to_string(),
                    NewsWindow::LastMonth => "cautiously optimistic".to_string(),
                },
            })
        };
        Box::pin(async move { result })
    }

    fn corporate_events(&self, symbol: &str) -> BoxFuture<'static, Result<Vec<Value>, FetchError>> {
        let result = if self.events_fail {
            Err(http(503, "/api/corporate-events"))
        } else {
            Ok(vec![json!({"symbol": symbol, "purpose": "Dividend"})])
        };
        Box::pin(async move { result })
    }

    fn conference_calls(
        &self,
        company_id: &str,
    ) -> BoxFuture<'static, Result<Vec<ConferenceCall>, FetchError>> {
        let result = self.calls.clone().ok_or_else(|| {
            http(404, &format!("/companies/{}/conference-calls/details/", company_id))
        });
        Box::pin(async move { result })
    }

    fn call_summary(
        &self,
        _company_id: &str,
        call: &ConferenceCall,
    ) -> BoxFuture<'static, Result<String, FetchError>> {
        let result = if self.failing_summaries.contains(&call.fiscal_year) {
            Err(http(500, "/summary/"))
        } else {
            Ok(format!("FY{} {} call", call.fiscal_year, call.fiscal_quarter))
        };
        Box::pin(async move { result })
    }
}

async fn wait_for_news(source: &ScriptedSource, expected: usize) {
    while source.news_started.load(Ordering::SeqCst) < expected {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_two_failures_out_of_five_sources() {
    let source = Arc::new(ScriptedSource {
        failing_windows: vec![NewsWindow::LastDay],
        events_fail: true,
        calls: Some(vec![call(2025, "Q1")]),
        ..ScriptedSource::default()
    });
    let aggregator = SignalAggregator::new(source);

    let BundleLoad::Ready(bundle) = aggregator.load_bundle("TCS", true).await.unwrap() else {
        panic!("expected a bundle");
    };

    let windows: Vec<NewsWindow> = bundle.news.keys().copied().collect();
    assert_eq!(windows, vec![NewsWindow::LastWeek, NewsWindow::LastMonth]);
    assert_eq!(bundle.conference_calls.len(), 1);
    assert!(bundle.corporate_events.is_none());
    assert_eq!(bundle.failed_sources, vec!["1-day news", "corporate events"]);
    assert_eq!(
        aggregator.state().error.as_deref(),
        Some("Some data could not be loaded: 1-day news, corporate events")
    );
}

#[tokio::test]
async fn test_missing_conference_calls_are_not_a_failure() {
    let aggregator = SignalAggregator::new(Arc::new(ScriptedSource::default()));

    let BundleLoad::Ready(bundle) = aggregator.load_bundle("TCS", true).await.unwrap() else {
        panic!("expected a bundle");
    };

    assert!(bundle.conference_calls.is_empty());
    assert!(bundle.failed_sources.is_empty());
    assert!(aggregator.state().error.is_none());
}

#[tokio::test]
async fn test_failed_summaries_are_filtered_out() {
    let source = Arc::new(ScriptedSource {
        calls: Some(vec![
            call(2023, "Q4"),
            call(2024, "Q4"),
            call(2025, "Q1"),
            call(2024, "Q3"),
        ]),
        failing_summaries: vec![2025],
        ..ScriptedSource::default()
    });
    let aggregator = SignalAggregator::new(source);

    let BundleLoad::Ready(bundle) = aggregator.load_bundle("TCS", true).await.unwrap() else {
        panic!("expected a bundle");
    };

    // Three most recent are 2025 Q1, 2024 Q4, 2024 Q3; the 2025 summary fails
    let quarters: Vec<(i32, &str)> = bundle
        .conference_calls
        .iter()
        .map(|c| (c.fiscal_year, c.fiscal_quarter.as_str()))
        .collect();
    assert_eq!(quarters, vec![(2024, "Q4"), (2024, "Q3")]);
    assert!(bundle.failed_sources.is_empty());
}

#[tokio::test]
async fn test_sentiment_is_canonicalized() {
    let aggregator = SignalAggregator::new(Arc::new(ScriptedSource::default()));

    let BundleLoad::Ready(bundle) = aggregator.load_bundle("INFY", true).await.unwrap() else {
        panic!("expected a bundle");
    };

    assert_eq!(bundle.news[&NewsWindow::LastDay].sentiment, Sentiment::Positive);
    assert_eq!(bundle.news[&NewsWindow::LastWeek].sentiment, Sentiment::Mixed);
    assert_eq!(
        bundle.news[&NewsWindow::LastMonth].sentiment,
        Sentiment::Other("Cautiously optimistic".to_string())
    );
}

#[tokio::test]
async fn test_reactivation_while_loading_does_not_fan_out_twice() {
    let source = Arc::new(ScriptedSource {
        hang_symbol: Some("TCS"),
        ..ScriptedSource::default()
    });
    let aggregator = Arc::new(SignalAggregator::new(source.clone()));

    let loader = aggregator.clone();
    let first = tokio::spawn(async move { loader.load_bundle("TCS", true).await });
    wait_for_news(&source, 3).await;

    assert_eq!(aggregator.phase("TCS"), BundlePhase::Loading);
    assert_eq!(
        aggregator.load_bundle("TCS", true).await.unwrap(),
        BundleLoad::InProgress
    );
    assert_eq!(source.news_started.load(Ordering::SeqCst), 3);

    aggregator.deactivate();
    assert_eq!(first.await.unwrap(), Err(FetchError::Superseded));
    assert_eq!(aggregator.phase("TCS"), BundlePhase::Idle);
    assert!(!aggregator.state().loading);
}

#[tokio::test]
async fn test_key_change_cancels_outstanding_fan_out() {
    let source = Arc::new(ScriptedSource {
        hang_symbol: Some("TCS"),
        ..ScriptedSource::default()
    });
    let aggregator = Arc::new(SignalAggregator::new(source.clone()));
    let mut state = aggregator.subscribe();

    let loader = aggregator.clone();
    let tcs = tokio::spawn(async move { loader.load_bundle("TCS", true).await });
    wait_for_news(&source, 3).await;

    let infy = aggregator.load_bundle("INFY", true).await.unwrap();
    assert!(matches!(infy, BundleLoad::Ready(_)));
    assert_eq!(tcs.await.unwrap(), Err(FetchError::Superseded));

    assert_eq!(aggregator.phase("TCS"), BundlePhase::Idle);
    assert!(matches!(aggregator.phase("INFY"), BundlePhase::Loaded(_)));

    let current = state.borrow_and_update().clone();
    assert_eq!(current.key.as_deref(), Some("INFY"));
    assert_eq!(current.bundle.map(|b| b.symbol.clone()).as_deref(), Some("INFY"));
}

#[tokio::test]
async fn test_abandoned_load_returns_key_to_idle() {
    let source = Arc::new(ScriptedSource {
        stalled: AtomicBool::new(true),
        ..ScriptedSource::default()
    });
    let aggregator = SignalAggregator::new(source.clone());

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), aggregator.load_bundle("TCS", true)).await;
    assert!(abandoned.is_err());

    assert_eq!(aggregator.phase("TCS"), BundlePhase::Idle);
    assert!(!aggregator.state().loading);

    source.stalled.store(false, Ordering::SeqCst);
    aggregator.reset("TCS");
    let reloaded = aggregator.load_bundle("TCS", true).await.unwrap();
    assert!(matches!(reloaded, BundleLoad::Ready(_)));
}
