//! Trial registry sources.
//!
//! A [`TrialSource`] performs exactly one page request and reports the raw
//! response body or a classified [`SourceError`]. Retrying, caching and
//! pagination live above this layer in [`crate::pipeline`].
//!
//! - [`ClinicalTrialsGovSource`]: the ClinicalTrials.gov v2 `studies` endpoint
//! - [`MockSource`]: scripted responses for tests

mod clinicaltrials;
pub mod mock;

pub use clinicaltrials::ClinicalTrialsGovSource;
pub use mock::MockSource;

use async_trait::async_trait;
use std::time::Duration;

use crate::models::Query;

/// The remote search boundary
#[async_trait]
pub trait TrialSource: Send + Sync + std::fmt::Debug {
    /// Short identifier used in logs
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Fetch one page for `query` and return the raw body
    async fn search_page(&self, query: &Query) -> Result<String, SourceError>;
}

/// Errors reported by a source for a single request
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// The request timed out
    #[error("Request timed out")]
    Timeout,

    /// The registry answered with a 5xx status
    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    /// The registry asked the client to slow down
    #[error("Rate limit exceeded")]
    RateLimit { retry_after: Option<Duration> },

    /// The registry rejected the request as malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The response could not be understood
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}
