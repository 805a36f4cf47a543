//! Product input and per-product result models.

use serde::{Deserialize, Deserializer, Serialize};

use super::TrialRecord;

/// Caller-supplied product identifier
///
/// Input workbooks carry ids as either text or numbers; both normalize to a
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ProductId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => ProductId(s.trim().to_string()),
            RawId::Number(n) => ProductId(n.to_string()),
        })
    }
}

/// A product to search trials for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductQuery {
    pub product_id: ProductId,

    /// Name searched against registry interventions
    pub product_name: String,

    /// Phase recorded for the product upstream (advisory only)
    #[serde(default)]
    pub original_phase: String,
}

impl ProductQuery {
    pub fn new(
        product_id: impl Into<String>,
        product_name: impl Into<String>,
        original_phase: impl Into<String>,
    ) -> Self {
        Self {
            product_id: ProductId::new(product_id),
            product_name: product_name.into(),
            original_phase: original_phase.into(),
        }
    }
}

/// A query variant that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantFailure {
    pub query_text: String,
    pub reason: String,
}

/// In-scope, deduplicated trials for one product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResult {
    pub product_id: ProductId,
    pub product_name: String,
    pub original_phase: String,

    /// Trials in first-seen order, unique by NCT number
    pub trials: Vec<TrialRecord>,

    /// Variants that failed while others succeeded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variant_failures: Vec<VariantFailure>,

    /// Whether any variant hit the pagination cap
    #[serde(default)]
    pub truncated: bool,
}

impl ProductResult {
    /// Empty result for a product
    pub fn empty(product: &ProductQuery) -> Self {
        Self {
            product_id: product.product_id.clone(),
            product_name: product.product_name.clone(),
            original_phase: product.original_phase.clone(),
            trials: Vec::new(),
            variant_failures: Vec::new(),
            truncated: false,
        }
    }

    /// Number of trials
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Whether no trials matched
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }
}

/// A product that produced no result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFailure {
    pub product_id: ProductId,
    pub product_name: String,
    pub reason: String,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Successful results in input order
    pub results: Vec<ProductResult>,

    /// Failed products in input order
    pub failures: Vec<ProductFailure>,
}

impl RunReport {
    /// Total trials across all results
    pub fn trial_count(&self) -> usize {
        self.results.iter().map(ProductResult::len).sum()
    }

    /// Ids of failed products
    pub fn failed_ids(&self) -> Vec<&ProductId> {
        self.failures.iter().map(|f| &f.product_id).collect()
    }
}
