//! Run driver: aggregates many products with bounded concurrency.

use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::aggregator::{AggregateError, Aggregator};
use super::fetcher::{FetchPolicy, Fetcher};
use super::filter::{PhaseMap, RegionSet, TrialFilter};
use super::resolver::Resolver;
use crate::config::Config;
use crate::models::{ProductFailure, ProductQuery, ProductResult, RunReport};
use crate::sources::TrialSource;
use crate::utils::CacheStore;

/// Reason recorded for products interrupted by cancellation
pub const CANCELLED_REASON: &str = "cancelled";

/// Progress notification sent after each product finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Products finished so far, including this one
    pub done: usize,
    pub total: usize,
    pub product_id: String,
    pub succeeded: bool,
}

/// Processes product lists through an [`Aggregator`]
#[derive(Debug, Clone)]
pub struct Harvester {
    aggregator: Aggregator,
    concurrency: usize,
}

impl Harvester {
    pub fn new(aggregator: Aggregator, concurrency: usize) -> Self {
        Self {
            aggregator,
            concurrency: concurrency.max(1),
        }
    }

    /// Wire the full pipeline from configuration
    pub fn from_config(
        config: &Config,
        source: Arc<dyn TrialSource>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        let fetcher = Fetcher::new(source, cache, FetchPolicy::from_config(&config.retry));
        let resolver = Resolver::new(fetcher, config.pipeline.max_pages);
        let filter = TrialFilter::new(RegionSet::from_config(&config.regions), PhaseMap::default());
        let aggregator = Aggregator::new(resolver, filter)
            .merge_policy(config.pipeline.merge_policy)
            .expand_variants(config.pipeline.expand_variants);

        Self::new(aggregator, config.pipeline.concurrency)
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Aggregate every product; results keep input order
    pub async fn run(&self, products: &[ProductQuery], cancel: &CancellationToken) -> RunReport {
        self.run_with_progress(products, cancel, |_| {}).await
    }

    /// Like [`Harvester::run`], calling `on_progress` as each product finishes
    pub async fn run_with_progress<F>(
        &self,
        products: &[ProductQuery],
        cancel: &CancellationToken,
        on_progress: F,
    ) -> RunReport
    where
        F: Fn(&Progress),
    {
        let total = products.len();
        let done = AtomicUsize::new(0);
        let on_progress = &on_progress;
        let done = &done;

        tracing::info!(
            "Harvesting {} products with concurrency {}",
            total,
            self.concurrency
        );

        let outcomes: Vec<Result<ProductResult, ProductFailure>> = stream::iter(products)
            .map(|product| async move {
                let outcome = self.harvest_one(product, cancel).await;
                on_progress(&Progress {
                    done: done.fetch_add(1, Ordering::SeqCst) + 1,
                    total,
                    product_id: product.product_id.to_string(),
                    succeeded: outcome.is_ok(),
                });
                outcome
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = RunReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(result) => report.results.push(result),
                Err(failure) => report.failures.push(failure),
            }
        }

        tracing::info!(
            "Run finished: {} products succeeded, {} failed, {} trials",
            report.results.len(),
            report.failures.len(),
            report.trial_count()
        );
        report
    }

    async fn harvest_one(
        &self,
        product: &ProductQuery,
        cancel: &CancellationToken,
    ) -> Result<ProductResult, ProductFailure> {
        let failure = |reason: String| ProductFailure {
            product_id: product.product_id.clone(),
            product_name: product.product_name.clone(),
            reason,
        };

        match self.aggregator.aggregate(product, cancel).await {
            Ok(result) => Ok(result),
            Err(AggregateError::Cancelled { .. }) => Err(failure(CANCELLED_REASON.to_string())),
            Err(e) => {
                tracing::error!("Product {} failed: {}", product.product_id, e);
                Err(failure(e.to_string()))
            }
        }
    }
}

/// Cancel `token` once `timeout` elapses
pub fn cancel_after(token: CancellationToken, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!("Run timeout of {:?} reached, cancelling", timeout);
                token.cancel();
            }
        }
    })
}
