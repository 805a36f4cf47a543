//! Per-product aggregation across query variants.

use regex::Regex;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

use super::filter::TrialFilter;
use super::resolver::Resolver;
use crate::models::{ProductId, ProductQuery, ProductResult, VariantFailure};
use crate::utils::{find_duplicate_ids, merge_by_nct, MergePolicy};

/// Errors that leave a product without a result
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("all {} query variants failed for product {product_id}", .failures.len())]
    AggregationFailed {
        product_id: ProductId,
        failures: Vec<VariantFailure>,
    },

    #[error("cancelled while aggregating product {product_id}")]
    Cancelled { product_id: ProductId },
}

fn separators() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| Regex::new(r"[-_/,+]+").expect("separator pattern is valid"))
}

/// Query texts searched for a product name, in search order
///
/// The trimmed name always comes first. With `expand` set, a second variant
/// replaces `- _ / , +` runs with spaces and collapses whitespace. Variants
/// that only differ by case from an earlier one are dropped.
pub fn query_variants(product_name: &str, expand: bool) -> Vec<String> {
    let exact = product_name.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut variants: Vec<String> = Vec::new();
    if exact.is_empty() {
        return variants;
    }
    variants.push(exact.clone());

    if expand {
        let spaced = separators().replace_all(&exact, " ");
        let normalized = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
        if !normalized.is_empty()
            && !variants.iter().any(|v| v.eq_ignore_ascii_case(&normalized))
        {
            variants.push(normalized);
        }
    }

    variants
}

/// Builds the deduplicated, in-scope trial set for a product
#[derive(Debug, Clone)]
pub struct Aggregator {
    resolver: Resolver,
    filter: TrialFilter,
    merge_policy: MergePolicy,
    expand_variants: bool,
}

impl Aggregator {
    pub fn new(resolver: Resolver, filter: TrialFilter) -> Self {
        Self {
            resolver,
            filter,
            merge_policy: MergePolicy::default(),
            expand_variants: true,
        }
    }

    /// Set the duplicate merge policy
    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Enable or disable punctuation-normalized name variants
    pub fn expand_variants(mut self, expand: bool) -> Self {
        self.expand_variants = expand;
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn filter(&self) -> &TrialFilter {
        &self.filter
    }

    /// Resolve every variant, filter by region and merge by NCT number
    ///
    /// A failing variant is recorded and skipped; the product fails only
    /// when no variant resolves.
    pub async fn aggregate(
        &self,
        product: &ProductQuery,
        cancel: &CancellationToken,
    ) -> Result<ProductResult, AggregateError> {
        let variants = query_variants(&product.product_name, self.expand_variants);
        let mut result = ProductResult::empty(product);
        let mut matched = Vec::new();
        let mut resolved = 0;

        for variant in &variants {
            match self.resolver.resolve(variant, cancel).await {
                Ok(resolution) => {
                    resolved += 1;
                    result.truncated |= resolution.truncated;
                    let total = resolution.records.len();
                    let before = matched.len();
                    matched.extend(
                        resolution
                            .records
                            .into_iter()
                            .filter(|record| self.filter.in_scope(record)),
                    );
                    tracing::debug!(
                        "Product {} variant {:?}: {} of {} trials in scope",
                        product.product_id,
                        variant,
                        matched.len() - before,
                        total
                    );
                }
                Err(e) if e.is_cancelled() => {
                    return Err(AggregateError::Cancelled {
                        product_id: product.product_id.clone(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Query variant {:?} failed for product {}: {}",
                        variant,
                        product.product_id,
                        e
                    );
                    result.variant_failures.push(VariantFailure {
                        query_text: variant.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if resolved == 0 {
            let mut failures = result.variant_failures;
            if failures.is_empty() {
                failures.push(VariantFailure {
                    query_text: product.product_name.clone(),
                    reason: "product name is empty".to_string(),
                });
            }
            return Err(AggregateError::AggregationFailed {
                product_id: product.product_id.clone(),
                failures,
            });
        }

        let duplicates = find_duplicate_ids(&matched).len();
        if duplicates > 0 {
            tracing::debug!(
                "Product {}: merging {} NCT numbers seen more than once",
                product.product_id,
                duplicates
            );
        }
        result.trials = merge_by_nct(matched, self.merge_policy);
        tracing::info!(
            "Product {} ({}): {} trials",
            product.product_id,
            product.product_name,
            result.trials.len()
        );
        Ok(result)
    }
}
