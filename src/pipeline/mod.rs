//! The retrieval pipeline.
//!
//! Layers, bottom up:
//!
//! - [`Fetcher`]: one page, through the cache, with rate-limit and transient retry
//! - [`Resolver`]: every page of one query text, normalized to [`TrialRecord`]s
//! - [`TrialFilter`]: region scope and advisory phase comparison
//! - [`Aggregator`]: all name variants of a product, filtered and merged by NCT number
//! - [`Harvester`]: many products with bounded concurrency
//!
//! [`TrialRecord`]: crate::models::TrialRecord

mod aggregator;
mod fetcher;
mod filter;
mod harvester;
mod resolver;

pub use aggregator::{query_variants, AggregateError, Aggregator};
pub use fetcher::{FetchError, FetchPolicy, Fetcher};
pub use filter::{in_scope, Classification, PhaseMap, RegionSet, TrialFilter};
pub use harvester::{cancel_after, Harvester, Progress, CANCELLED_REASON};
pub use resolver::{Resolution, ResolveError, Resolver, DEFAULT_MAX_PAGES};
