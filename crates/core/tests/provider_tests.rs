// ═══════════════════════════════════════════════════════════════════
// Provider Tests: ProviderChain fallback, Alpha Vantage over HTTP
// (mockito), Yahoo Finance construction, trait compliance
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use portfolio_risk_core::errors::CoreError;
use portfolio_risk_core::models::price::{PricePoint, PriceSeries};
use portfolio_risk_core::providers::alphavantage::AlphaVantageProvider;
use portfolio_risk_core::providers::registry::ProviderChain;
use portfolio_risk_core::providers::traits::PriceSeriesProvider;
use portfolio_risk_core::providers::yahoo_finance::YahooFinanceProvider;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

// ═══════════════════════════════════════════════════════════════════
// Mock Providers
// ═══════════════════════════════════════════════════════════════════

struct MockProvider {
    name: &'static str,
    close: f64,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    fn new(name: &'static str, close: f64) -> Self {
        Self {
            name,
            close,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl PriceSeriesProvider for MockProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        PriceSeries::new(
            ticker,
            vec![
                PricePoint::new(start, self.close),
                PricePoint::new(end, self.close + 1.0),
            ],
        )
    }
}

struct FailingProvider {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl PriceSeriesProvider for FailingProvider {
    fn name(&self) -> &str {
        "FailingProvider"
    }

    async fn fetch(
        &self,
        ticker: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<PriceSeries, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoreError::provider("FailingProvider", format!("nothing for {ticker}")))
    }
}

/// Never answers within any sane timeout.
struct HangingProvider {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl PriceSeriesProvider for HangingProvider {
    fn name(&self) -> &str {
        "HangingProvider"
    }

    async fn fetch(
        &self,
        ticker: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<PriceSeries, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        PriceSeries::new(ticker, vec![])
    }
}

/// Returns `Ok` with no points, which the chain must treat as a miss.
struct EmptyProvider;

#[async_trait]
impl PriceSeriesProvider for EmptyProvider {
    fn name(&self) -> &str {
        "EmptyProvider"
    }

    async fn fetch(
        &self,
        ticker: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<PriceSeries, CoreError> {
        PriceSeries::new(ticker, vec![])
    }
}

// ═══════════════════════════════════════════════════════════════════
// ProviderChain
// ═══════════════════════════════════════════════════════════════════

mod provider_chain {
    use super::*;

    #[test]
    fn new_is_empty() {
        let chain = ProviderChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.len(), 0);
        assert_eq!(chain.name(), "ProviderChain");
    }

    #[test]
    fn registration_order_is_kept() {
        let mut chain = ProviderChain::default();
        chain.register(Box::new(MockProvider::new("first", 1.0)));
        chain.register(Box::new(MockProvider::new("second", 2.0)));
        assert_eq!(chain.provider_names(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn empty_chain_fails_with_no_provider() {
        let chain = ProviderChain::new();
        let err = chain.fetch("AAPL", d(2024, 1, 1), d(2024, 1, 5)).await.unwrap_err();
        assert!(matches!(err, CoreError::NoProvider));
    }

    #[tokio::test]
    async fn first_success_wins() {
        let second = MockProvider::new("second", 2.0);
        let second_calls = second.calls.clone();

        let mut chain = ProviderChain::new();
        chain.register(Box::new(MockProvider::new("first", 1.0)));
        chain.register(Box::new(second));

        let series = chain.fetch("aapl", d(2024, 1, 1), d(2024, 1, 5)).await.unwrap();
        assert_eq!(series.ticker(), "AAPL");
        assert_eq!(series.closes(), vec![1.0, 2.0]);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_after_failure() {
        let failing_calls = Arc::new(AtomicUsize::new(0));
        let mut chain = ProviderChain::new();
        chain.register(Box::new(FailingProvider {
            calls: failing_calls.clone(),
        }));
        chain.register(Box::new(MockProvider::new("backup", 50.0)));

        let series = chain.fetch("MSFT", d(2024, 1, 1), d(2024, 1, 5)).await.unwrap();
        assert_eq!(series.latest().map(|p| p.close), Some(51.0));
        assert_eq!(failing_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_result_falls_through() {
        let mut chain = ProviderChain::new();
        chain.register(Box::new(EmptyProvider));
        chain.register(Box::new(MockProvider::new("backup", 7.0)));

        let series = chain.fetch("VTI", d(2024, 1, 1), d(2024, 1, 5)).await.unwrap();
        assert_eq!(series.len(), 2);
    }

    #[tokio::test]
    async fn all_failing_returns_last_error() {
        let mut chain = ProviderChain::new();
        chain.register(Box::new(EmptyProvider));
        chain.register(Box::new(FailingProvider {
            calls: Arc::new(AtomicUsize::new(0)),
        }));

        let err = chain.fetch("BND", d(2024, 1, 1), d(2024, 1, 5)).await.unwrap_err();
        match err {
            CoreError::Provider { provider, message } => {
                assert_eq!(provider, "FailingProvider");
                assert!(message.contains("BND"));
            }
            other => panic!("expected Provider error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_provider_times_out_and_falls_through() {
        let hanging_calls = Arc::new(AtomicUsize::new(0));
        let mut chain = ProviderChain::new().with_timeout(Duration::from_secs(2));
        chain.register(Box::new(HangingProvider {
            calls: hanging_calls.clone(),
        }));
        chain.register(Box::new(MockProvider::new("backup", 9.0)));

        let began = tokio::time::Instant::now();
        let series = chain.fetch("AAPL", d(2024, 1, 1), d(2024, 1, 5)).await.unwrap();

        assert_eq!(series.closes(), vec![9.0, 10.0]);
        assert_eq!(hanging_calls.load(Ordering::SeqCst), 1);
        assert!(began.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn every_provider_hung_is_a_timeout() {
        let mut chain = ProviderChain::new().with_timeout(Duration::from_secs(1));
        chain.register(Box::new(HangingProvider {
            calls: Arc::new(AtomicUsize::new(0)),
        }));

        let err = chain.fetch("AAPL", d(2024, 1, 1), d(2024, 1, 5)).await.unwrap_err();
        match err {
            CoreError::Timeout { provider, seconds } => {
                assert_eq!(provider, "HangingProvider");
                assert_eq!(seconds, 1);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn sources_and_timeout() {
        let mut chain = ProviderChain::new();
        assert_eq!(chain.sources(), 1);
        assert_eq!(chain.timeout(), Duration::from_secs(5));

        chain.register(Box::new(MockProvider::new("first", 1.0)));
        chain.register(Box::new(MockProvider::new("second", 2.0)));
        assert_eq!(chain.sources(), 2);
        assert_eq!(MockProvider::new("solo", 1.0).sources(), 1);
    }

    #[test]
    fn defaults_without_keys_only_yahoo() {
        let chain = ProviderChain::new_with_defaults(&HashMap::new());
        assert_eq!(chain.provider_names(), vec!["Yahoo Finance"]);
    }

    #[test]
    fn defaults_with_alphavantage_key() {
        let keys = HashMap::from([("alphavantage".to_string(), "demo".to_string())]);
        let chain = ProviderChain::new_with_defaults(&keys);
        assert_eq!(chain.provider_names(), vec!["Yahoo Finance", "Alpha Vantage"]);
    }
}

// ═══════════════════════════════════════════════════════════════════
// AlphaVantageProvider (HTTP mocked with mockito)
// ═══════════════════════════════════════════════════════════════════

mod alphavantage {
    use super::*;
    use mockito::Matcher;

    const DAILY_BODY: &str = r#"{
        "Meta Data": { "2. Symbol": "IBM" },
        "Time Series (Daily)": {
            "2024-01-05": { "1. open": "160.0", "4. close": "159.16", "5. volume": "1" },
            "2024-01-03": { "1. open": "160.0", "4. close": "158.82", "5. volume": "1" },
            "2024-01-04": { "1. open": "160.0", "4. close": "159.00", "5. volume": "1" },
            "2023-12-29": { "1. open": "160.0", "4. close": "163.55", "5. volume": "1" }
        }
    }"#;

    fn provider_for(server: &mockito::ServerGuard) -> AlphaVantageProvider {
        AlphaVantageProvider::with_base_url("test-key".into(), format!("{}/query", server.url()))
    }

    #[test]
    fn name() {
        assert_eq!(AlphaVantageProvider::new("k".into()).name(), "Alpha Vantage");
    }

    #[tokio::test]
    async fn parses_sorts_and_filters_daily_series() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("function".into(), "TIME_SERIES_DAILY".into()),
                Matcher::UrlEncoded("symbol".into(), "IBM".into()),
                Matcher::UrlEncoded("outputsize".into(), "full".into()),
                Matcher::UrlEncoded("apikey".into(), "test-key".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(DAILY_BODY)
            .create_async()
            .await;

        let provider = provider_for(&server);
        let series = provider.fetch("ibm", d(2024, 1, 1), d(2024, 1, 31)).await.unwrap();

        mock.assert_async().await;
        assert_eq!(series.ticker(), "IBM");
        assert_eq!(series.len(), 3, "2023-12-29 is outside the range");
        assert_eq!(series.first_date(), Some(d(2024, 1, 3)));
        assert_eq!(series.closes(), vec![158.82, 159.00, 159.16]);
    }

    #[tokio::test]
    async fn rate_limit_note_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{ "Note": "Thank you for using Alpha Vantage! Our standard API rate limit is 25 requests per day." }"#)
            .create_async()
            .await;

        let provider = provider_for(&server);
        let err = provider.fetch("IBM", d(2024, 1, 1), d(2024, 1, 31)).await.unwrap_err();
        match err {
            CoreError::Provider { provider, message } => {
                assert_eq!(provider, "Alpha Vantage");
                assert!(message.contains("rate limit"));
            }
            other => panic!("expected Provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_429_is_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let provider = provider_for(&server);
        let err = provider.fetch("IBM", d(2024, 1, 1), d(2024, 1, 31)).await.unwrap_err();
        assert!(err.to_string().contains("Rate limited"));
    }

    #[tokio::test]
    async fn server_error_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let provider = provider_for(&server);
        let err = provider.fetch("IBM", d(2024, 1, 1), d(2024, 1, 31)).await.unwrap_err();
        assert!(matches!(err, CoreError::Provider { .. }));
    }

    #[tokio::test]
    async fn malformed_close_is_invalid_series() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{ "Time Series (Daily)": { "2024-01-05": { "4. close": "n/a" } } }"#)
            .create_async()
            .await;

        let provider = provider_for(&server);
        let err = provider.fetch("IBM", d(2024, 1, 1), d(2024, 1, 31)).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidSeries(_)));
    }

    #[tokio::test]
    async fn negative_close_rejected_at_boundary() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{ "Time Series (Daily)": { "2024-01-05": { "4. close": "-3.0" } } }"#)
            .create_async()
            .await;

        let provider = provider_for(&server);
        let err = provider.fetch("IBM", d(2024, 1, 1), d(2024, 1, 31)).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidSeries(_)));
    }

    #[tokio::test]
    async fn no_points_in_range_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(DAILY_BODY)
            .create_async()
            .await;

        let provider = provider_for(&server);
        let err = provider.fetch("IBM", d(2022, 1, 1), d(2022, 1, 31)).await.unwrap_err();
        assert!(err.to_string().contains("No quotes for IBM"));
    }
}

// ═══════════════════════════════════════════════════════════════════
// YahooFinanceProvider
// ═══════════════════════════════════════════════════════════════════

mod yahoo_finance {
    use super::*;

    #[test]
    fn name() {
        let provider = YahooFinanceProvider::new().unwrap();
        assert_eq!(provider.name(), "Yahoo Finance");
    }
}

// ═══════════════════════════════════════════════════════════════════
// Provider trait compliance
// ═══════════════════════════════════════════════════════════════════

mod trait_compliance {
    use super::*;

    /// Verify all providers implement Send + Sync (required by async-trait).
    #[test]
    fn providers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<AlphaVantageProvider>();
        assert_send_sync::<YahooFinanceProvider>();
        assert_send_sync::<ProviderChain>();
    }

    /// A chain can itself sit behind `Arc<dyn PriceSeriesProvider>`.
    #[test]
    fn chain_as_trait_object() {
        let mut chain = ProviderChain::new();
        chain.register(Box::new(MockProvider::new("m", 1.0)));
        let provider: Arc<dyn PriceSeriesProvider> = Arc::new(chain);
        assert_eq!(provider.name(), "ProviderChain");
    }
}
