//! Rate-limited, cache-backed page fetcher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::models::{CacheKey, Query, RawPage};
use crate::sources::{SourceError, TrialSource};
use crate::utils::{backoff_wait, BackoffPolicy, CacheStore, RetryClass, Sleeper, TokioSleeper};

/// Backoff policies for the two retryable failure kinds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchPolicy {
    /// Used when the registry signals rate limiting
    pub rate_limit: BackoffPolicy,
    /// Used for network and server errors
    pub transient: BackoffPolicy,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl FetchPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            rate_limit: config.rate_limit.to_policy(),
            transient: config.transient.to_policy(),
        }
    }

    /// Policy with no waiting, for tests
    pub fn immediate(rate_limit_attempts: u32, transient_attempts: u32) -> Self {
        Self {
            rate_limit: BackoffPolicy::immediate(rate_limit_attempts),
            transient: BackoffPolicy::immediate(transient_attempts),
        }
    }
}

/// Errors from fetching a single page
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The registry rejected the query; not retried
    #[error("invalid query {query}: {source}")]
    InvalidQuery { query: String, source: SourceError },

    /// Still rate limited after the allowed attempts
    #[error("rate limit still exceeded for {query} after {attempts} attempts")]
    RateLimitExceeded { query: String, attempts: u32 },

    /// Transient failures persisted, or the body was unusable
    #[error("fetch failed for {query} after {attempts} attempts: {source}")]
    FetchFailed {
        query: String,
        attempts: u32,
        source: SourceError,
    },

    /// The run was cancelled
    #[error("fetch cancelled")]
    Cancelled,
}

/// Fetches one page at a time, reading and writing through the cache
#[derive(Debug, Clone)]
pub struct Fetcher {
    source: Arc<dyn TrialSource>,
    cache: Arc<dyn CacheStore>,
    policy: FetchPolicy,
    sleeper: Arc<dyn Sleeper>,
    cache_hits: Arc<AtomicUsize>,
    remote_calls: Arc<AtomicUsize>,
}

impl Fetcher {
    /// Create a fetcher that sleeps on the tokio timer
    pub fn new(source: Arc<dyn TrialSource>, cache: Arc<dyn CacheStore>, policy: FetchPolicy) -> Self {
        Self::with_sleeper(source, cache, policy, Arc::new(TokioSleeper))
    }

    /// Create a fetcher with a custom sleeper (virtual time in tests)
    pub fn with_sleeper(
        source: Arc<dyn TrialSource>,
        cache: Arc<dyn CacheStore>,
        policy: FetchPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            source,
            cache,
            policy,
            sleeper,
            cache_hits: Arc::new(AtomicUsize::new(0)),
            remote_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pages served from the cache so far
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Requests sent to the source so far
    pub fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::Relaxed)
    }

    /// Fetch one page
    ///
    /// Cache hits return without touching the network. Fresh bodies are
    /// written to the cache before the parsed page is returned.
    pub async fn fetch(&self, query: &Query, cancel: &CancellationToken) -> Result<RawPage, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let key = query.cache_key();
        if let Some(page) = self.read_cache(&key, query) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(page);
        }

        let mut rate_limited: u32 = 0;
        let mut transient: u32 = 0;
        let mut last_rate_delay = Duration::ZERO;

        loop {
            self.remote_calls.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Requesting {} from {}", query, self.source.id());
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = self.source.search_page(query) => outcome,
            };
            let attempts = rate_limited + transient + 1;

            let error = match outcome {
                Ok(body) => {
                    let page = RawPage::parse(&body).map_err(|e| FetchError::FetchFailed {
                        query: query.to_string(),
                        attempts,
                        source: SourceError::from(e),
                    })?;
                    self.write_cache(&key, query, &body);
                    if attempts > 1 {
                        tracing::info!("Fetched {} on attempt {}", query, attempts);
                    }
                    return Ok(page);
                }
                Err(error) => error,
            };

            let delay = match RetryClass::of(&error) {
                RetryClass::Permanent => {
                    return Err(match error {
                        SourceError::InvalidRequest(_) => FetchError::InvalidQuery {
                            query: query.to_string(),
                            source: error,
                        },
                        other => FetchError::FetchFailed {
                            query: query.to_string(),
                            attempts,
                            source: other,
                        },
                    });
                }
                RetryClass::RateLimited(hint) => {
                    rate_limited += 1;
                    let policy = &self.policy.rate_limit;
                    if !policy.allows_retry(rate_limited) {
                        tracing::warn!(
                            "Rate limit persisted for {} after {} attempts",
                            query,
                            rate_limited
                        );
                        return Err(FetchError::RateLimitExceeded {
                            query: query.to_string(),
                            attempts: rate_limited,
                        });
                    }
                    let delay = policy
                        .delay_for(rate_limited)
                        .max(hint.unwrap_or_default())
                        .min(policy.max_delay)
                        .max(last_rate_delay);
                    last_rate_delay = delay;
                    tracing::warn!("Rate limited on {}, backing off {:?}", query, delay);
                    delay
                }
                RetryClass::Transient => {
                    transient += 1;
                    let policy = &self.policy.transient;
                    if !policy.allows_retry(transient) {
                        tracing::warn!(
                            "Giving up on {} after {} attempts: {}",
                            query,
                            attempts,
                            error
                        );
                        return Err(FetchError::FetchFailed {
                            query: query.to_string(),
                            attempts,
                            source: error,
                        });
                    }
                    let delay = policy.delay_for(transient);
                    tracing::debug!(
                        "Transient error on attempt {} for {}: {}, retrying in {:?}",
                        attempts,
                        query,
                        error,
                        delay
                    );
                    delay
                }
            };

            backoff_wait(self.sleeper.as_ref(), delay, cancel)
                .await
                .map_err(|_| FetchError::Cancelled)?;
        }
    }

    /// Cache lookup; every failure degrades to a miss
    fn read_cache(&self, key: &CacheKey, query: &Query) -> Option<RawPage> {
        let entry = match self.cache.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", query, e);
                return None;
            }
        };

        if !entry.matches(query) {
            tracing::warn!("Cache entry {} was stored for another query, ignoring", key);
            return None;
        }

        match RawPage::parse(&entry.body) {
            Ok(page) => {
                tracing::debug!("Cache HIT for {}", query);
                Some(page)
            }
            Err(e) => {
                tracing::warn!("Cached body for {} is unreadable, refetching: {}", query, e);
                None
            }
        }
    }

    /// Cache write; failures are logged and otherwise ignored
    fn write_cache(&self, key: &CacheKey, query: &Query, body: &str) {
        if let Err(e) = self.cache.put(key, query, body) {
            tracing::warn!("Failed to cache response for {}: {}", query, e);
        }
    }
}
