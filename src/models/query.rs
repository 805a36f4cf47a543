//! Page query and raw page models.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One page request against the registry search endpoint
///
/// Identity is `(query_text, page_token)`; that pair is what the cache is
/// keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    /// Free-text intervention query
    pub query_text: String,

    /// Opaque continuation token (absent for the first page)
    pub page_token: Option<String>,
}

impl Query {
    /// Query for the first page of `query_text`
    pub fn first_page(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            page_token: None,
        }
    }

    /// Query for the page following `token`
    pub fn next_page(&self, token: impl Into<String>) -> Self {
        Self {
            query_text: self.query_text.clone(),
            page_token: Some(token.into()),
        }
    }

    /// Stable cache key for this query
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_query(self)
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.page_token {
            Some(token) => write!(f, "{:?} (page {})", self.query_text, token),
            None => write!(f, "{:?} (first page)", self.query_text),
        }
    }
}

/// Hex-encoded SHA-256 of a query identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a query
    ///
    /// The query text is length-prefixed so no `(text, token)` pair can
    /// serialize to the same input as another.
    pub fn for_query(query: &Query) -> Self {
        let input = format!(
            "{}:{}|{}",
            query.query_text.len(),
            query.query_text,
            query.page_token.as_deref().unwrap_or("-")
        );
        let digest = Sha256::digest(input.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex)
    }

    /// The key as a string (safe to use as a file name)
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of raw search results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPage {
    /// Study payloads in API order
    #[serde(rename = "studies")]
    pub records: Vec<serde_json::Value>,

    /// Continuation token for the next page
    #[serde(rename = "nextPageToken", default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

impl RawPage {
    /// Parse a response body
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}
