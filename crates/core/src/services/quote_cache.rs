use chrono::NaiveDate;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::errors::CoreError;
use crate::models::price::{CacheEntry, CacheKey, CacheStats, PriceSeries};
use crate::models::settings::CacheConfig;
use crate::providers::traits::PriceSeriesProvider;

type EntryMap = Arc<RwLock<HashMap<CacheKey, CacheEntry>>>;

/// Outcome of one refresh, handed to every caller waiting on it.
type FlightResult = Result<Arc<PriceSeries>, Arc<CoreError>>;
type Flight = Shared<BoxFuture<'static, FlightResult>>;

/// At most one running refresh per key. A flight removes itself once its
/// outcome is known and its entry (if any) is stored.
type InFlightMap = Arc<Mutex<HashMap<CacheKey, Flight>>>;

/// How a [`Quote`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    /// Fetched from the provider by this call
    Provider,
    /// Served from a live cache entry
    Cache,
    /// Provider failed; an expired entry was served instead
    StaleFallback,
}

/// A price series plus the side-channel staleness flag.
#[derive(Debug, Clone)]
pub struct Quote {
    pub series: Arc<PriceSeries>,
    pub source: QuoteSource,
}

impl Quote {
    /// True when the series is older than its TTL because the provider failed.
    pub fn is_degraded(&self) -> bool {
        self.source == QuoteSource::StaleFallback
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    provider_calls: AtomicU64,
    stale_served: AtomicU64,
    evicted: AtomicU64,
}

/// Memoizes provider responses per (ticker, start day, end day).
///
/// Cache strategy:
/// - **Ranges ending today or later**: live for `live_ttl` (default 15 min).
/// - **Ranges ending in the past**: live for `historical_ttl` (default 24 h).
/// - **Stale entries** are refreshed lazily on the next `get`; if the refresh
///   fails they are still served, flagged as degraded.
/// - **Retention**: entries older than `retention` are evicted on the next miss.
/// - **Single-flight**: the first caller for a key starts a refresh; everyone
///   arriving while it runs awaits that same refresh and shares its outcome,
///   success or failure.
///
/// Construct one per process and share it as `Arc<QuoteCache>`.
pub struct QuoteCache {
    provider: Arc<dyn PriceSeriesProvider>,
    config: CacheConfig,
    entries: EntryMap,
    in_flight: InFlightMap,
    counters: Arc<Counters>,
}

impl QuoteCache {
    pub fn new(provider: Arc<dyn PriceSeriesProvider>, config: CacheConfig) -> Self {
        Self {
            provider,
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Daily closes for `ticker` over `[start, end]`, from cache when live.
    ///
    /// Fails with [`CoreError::DataUnavailable`] only when the provider fails
    /// and no entry (live or stale) exists for the key.
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn get(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Quote, CoreError> {
        if start > end {
            return Err(CoreError::ValidationError(format!(
                "start date ({start}) must not be after end date ({end})"
            )));
        }
        let key = CacheKey::new(ticker, start, end);
        if key.ticker.is_empty() {
            return Err(CoreError::ValidationError("ticker must not be empty".into()));
        }

        if let Some(series) = self.live_series(&key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "cache hit");
            return Ok(Quote {
                series,
                source: QuoteSource::Cache,
            });
        }

        let (flight, leader) = {
            let mut in_flight = self.in_flight.lock().await;

            // A flight that finished since the first check stored its entry
            // before leaving the map.
            if let Some(series) = self.live_series(&key).await {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "cache hit after in-flight refresh");
                return Ok(Quote {
                    series,
                    source: QuoteSource::Cache,
                });
            }

            match in_flight.get(&key) {
                Some(flight) => (flight.clone(), false),
                None => {
                    self.evict_expired().await;
                    let flight = self.start_flight(key.clone());
                    in_flight.insert(key.clone(), flight.clone());
                    (flight, true)
                }
            }
        };

        if leader {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(%key, "joining in-flight refresh");
        }

        match flight.await {
            Ok(series) if leader => Ok(Quote {
                series,
                source: QuoteSource::Provider,
            }),
            Ok(series) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Quote {
                    series,
                    source: QuoteSource::Cache,
                })
            }
            Err(e) => self.fallback(key, &e).await,
        }
    }

    /// Drop entries for one ticker, or every entry when `ticker` is `None`.
    /// Returns the number of entries removed. Running refreshes are left alone.
    pub async fn invalidate(&self, ticker: Option<&str>) -> usize {
        let upper = ticker.map(|t| t.trim().to_uppercase());

        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|key, _| upper.as_ref().is_some_and(|t| &key.ticker != t));
            before - entries.len()
        };

        info!(ticker = ?upper, removed, "cache invalidated");
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        self.evict_expired().await;

        let now = Instant::now();
        let in_flight = self.in_flight.lock().await.len();
        let entries = self.entries.read().await;

        let live_entries = entries.values().filter(|e| e.is_live(now)).count();
        let tickers: HashSet<&str> = entries.keys().map(|k| k.ticker.as_str()).collect();

        CacheStats {
            entries: entries.len(),
            live_entries,
            stale_entries: entries.len() - live_entries,
            tickers: tickers.len(),
            total_points: entries.values().map(|e| e.series.len()).sum(),
            oldest_fetch: entries.values().map(|e| e.fetched_at_utc).min(),
            newest_fetch: entries.values().map(|e| e.fetched_at_utc).max(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            provider_calls: self.counters.provider_calls.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            in_flight,
        }
    }

    async fn live_series(&self, key: &CacheKey) -> Option<Arc<PriceSeries>> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.series.clone())
    }

    /// Serve the stale entry for `key` after a failed refresh, if one is left.
    async fn fallback(&self, key: CacheKey, error: &CoreError) -> Result<Quote, CoreError> {
        let stale = self.entries.read().await.get(&key).map(|entry| entry.series.clone());
        match stale {
            Some(series) => {
                self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                warn!(%key, %error, "provider failed, serving stale series");
                Ok(Quote {
                    series,
                    source: QuoteSource::StaleFallback,
                })
            }
            None => {
                warn!(%key, %error, "provider failed and nothing is cached");
                Err(CoreError::DataUnavailable {
                    ticker: key.ticker,
                    reason: error.to_string(),
                })
            }
        }
    }

    /// Drop entries that outlived the retention window.
    async fn evict_expired(&self) {
        let now = Instant::now();
        let retention = self.config.retention();

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.age(now) <= retention);
        let evicted = before - entries.len();

        if evicted > 0 {
            self.counters.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, retention_secs = retention.as_secs(), "evicted expired cache entries");
        }
    }

    /// Build the shared refresh for `key`. It owns everything it touches, so
    /// it keeps going for the remaining waiters even if the caller that
    /// started it is dropped.
    fn start_flight(&self, key: CacheKey) -> Flight {
        let provider = self.provider.clone();
        let config = self.config.clone();
        let entries = self.entries.clone();
        let in_flight = self.in_flight.clone();
        let counters = self.counters.clone();

        async move {
            let outcome = match fetch_with_retry(provider.as_ref(), &config, &counters, &key).await {
                Ok(series) => {
                    let series = Arc::new(series);
                    let ttl = ttl_for(&config, &key);
                    info!(%key, points = series.len(), ttl_secs = ttl.as_secs(), "cached fresh series");
                    entries
                        .write()
                        .await
                        .insert(key.clone(), CacheEntry::new(series.clone(), ttl));
                    Ok(series)
                }
                Err(e) => Err(Arc::new(e)),
            };

            in_flight.lock().await.remove(&key);
            outcome
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for QuoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteCache")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish()
    }
}

fn ttl_for(config: &CacheConfig, key: &CacheKey) -> Duration {
    let today = chrono::Utc::now().date_naive();
    if key.end >= today {
        config.live_ttl()
    } else {
        config.historical_ttl()
    }
}

/// Call the provider up to `fetch_attempts` times with doubling backoff in
/// between. Each attempt gets `provider_timeout` per upstream source.
async fn fetch_with_retry(
    provider: &dyn PriceSeriesProvider,
    config: &CacheConfig,
    counters: &Counters,
    key: &CacheKey,
) -> Result<PriceSeries, CoreError> {
    let attempts = config.fetch_attempts.max(1);
    let sources = u32::try_from(provider.sources().max(1)).unwrap_or(u32::MAX);
    let timeout = config.provider_timeout().saturating_mul(sources);
    let mut backoff = config.retry_backoff();
    let mut last_error = None;

    for attempt in 1..=attempts {
        counters.provider_calls.fetch_add(1, Ordering::Relaxed);
        let call = provider.fetch(&key.ticker, key.start, key.end);

        let error = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(series)) if !series.is_empty() => return Ok(series),
            Ok(Ok(_)) => CoreError::provider(
                provider.name(),
                format!("No data for {} between {} and {}", key.ticker, key.start, key.end),
            ),
            Ok(Err(e)) => e,
            Err(_) => CoreError::Timeout {
                provider: provider.name().to_string(),
                seconds: timeout.as_secs(),
            },
        };

        if attempt < attempts {
            warn!(
                %key,
                attempt,
                retry_in_ms = backoff.as_millis() as u64,
                error = %error,
                "fetch attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
        last_error = Some(error);
    }

    Err(last_error.unwrap_or(CoreError::NoProvider))
}
