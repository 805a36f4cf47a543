//! Utility modules supporting the harvest pipeline.
//!
//! - [`CacheStore`]: durable response cache ([`FileCacheStore`], [`MemoryCacheStore`], [`NoopCacheStore`])
//! - [`merge_by_nct`]: deduplicate trials by NCT number under a [`MergePolicy`]
//! - [`HttpClient`]: HTTP client with sensible defaults
//! - [`BackoffPolicy`]: bounded exponential backoff, with [`Sleeper`] for virtual time
//!
//! # Deduplication
//!
//! ```rust
//! use trial_harvest::utils::{merge_by_nct, MergePolicy};
//! use trial_harvest::models::TrialRecord;
//!
//! # fn example(trials: Vec<TrialRecord>) {
//! // One record per NCT number, values from the last occurrence
//! let unique = merge_by_nct(trials, MergePolicy::LastSeen);
//! # }
//! ```
//!
//! # Backoff
//!
//! ```rust
//! use std::time::Duration;
//! use trial_harvest::utils::BackoffPolicy;
//!
//! let policy = BackoffPolicy {
//!     max_attempts: 4,
//!     base_delay: Duration::from_secs(1),
//!     multiplier: 2.0,
//!     max_delay: Duration::from_secs(3),
//! };
//! assert_eq!(policy.delay_for(3), Duration::from_secs(3));
//! ```

mod cache;
mod dedup;
mod http;
mod retry;

pub use cache::{
    CacheError, CacheStats, CacheStore, CachedResponse, FileCacheStore, MemoryCacheStore,
    NoopCacheStore,
};
pub use dedup::{find_duplicate_ids, merge_by_nct, MergePolicy};
pub use http::HttpClient;
pub use retry::{
    backoff_wait, BackoffPolicy, Cancelled, RetryClass, Sleeper, TokioSleeper, VirtualSleeper,
};
