//! Drives the fetcher across result pages for one query text.

use tokio_util::sync::CancellationToken;

use super::fetcher::{FetchError, Fetcher};
use crate::models::{Query, TrialRecord};

/// Pages fetched per query before giving up on pagination
pub const DEFAULT_MAX_PAGES: usize = 100;

/// Trials resolved for one query text
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub query_text: String,

    /// Records in page order, then in-page order
    pub records: Vec<TrialRecord>,

    /// Pages fetched
    pub pages: usize,

    /// Raw records that could not be normalized
    pub skipped: usize,

    /// Pagination stopped at the page cap with more pages pending
    pub truncated: bool,
}

/// Resolution failures; any partial pages are discarded
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("resolution failed for {query:?}: {source}")]
    ResolutionFailed {
        query: String,
        #[source]
        source: FetchError,
    },
}

impl ResolveError {
    /// Whether the failure was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ResolveError::ResolutionFailed {
                source: FetchError::Cancelled,
                ..
            }
        )
    }
}

/// Resolves a query text into a merged list of trials
#[derive(Debug, Clone)]
pub struct Resolver {
    fetcher: Fetcher,
    max_pages: usize,
}

impl Resolver {
    pub fn new(fetcher: Fetcher, max_pages: usize) -> Self {
        Self {
            fetcher,
            max_pages: max_pages.max(1),
        }
    }

    /// The underlying fetcher
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Fetch every page for `query_text` and normalize the records
    pub async fn resolve(
        &self,
        query_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let mut query = Query::first_page(query_text);
        let mut records = Vec::new();
        let mut pages = 0;
        let mut skipped = 0;
        let mut truncated = false;

        loop {
            let page = self.fetcher.fetch(&query, cancel).await.map_err(|source| {
                ResolveError::ResolutionFailed {
                    query: query_text.to_string(),
                    source,
                }
            })?;
            pages += 1;

            for raw in &page.records {
                match TrialRecord::from_study(raw) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        skipped += 1;
                        tracing::debug!("Skipping record on {}: {}", query, e);
                    }
                }
            }

            let next = page.next_page_token.filter(|token| !token.is_empty());
            match next {
                None => break,
                Some(_) if pages >= self.max_pages => {
                    tracing::warn!(
                        "PaginationLimitExceeded: stopped {:?} after {} pages with more pending",
                        query_text,
                        pages
                    );
                    truncated = true;
                    break;
                }
                Some(token) => query = query.next_page(token),
            }
        }

        if skipped > 0 {
            tracing::warn!(
                "Skipped {} malformed records while resolving {:?}",
                skipped,
                query_text
            );
        }
        tracing::debug!(
            "Resolved {:?}: {} records over {} pages",
            query_text,
            records.len(),
            pages
        );

        Ok(Resolution {
            query_text: query_text.to_string(),
            records,
            pages,
            skipped,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FetchPolicy;
    use crate::sources::mock::{make_study, page_body};
    use crate::sources::{MockSource, SourceError};
    use crate::utils::MemoryCacheStore;
    use serde_json::json;
    use std::sync::Arc;

    fn resolver(source: Arc<MockSource>, cache: Arc<MemoryCacheStore>, max_pages: usize) -> Resolver {
        let fetcher = Fetcher::new(source, cache, FetchPolicy::immediate(2, 2));
        Resolver::new(fetcher, max_pages)
    }

    fn ids(resolution: &Resolution) -> Vec<&str> {
        resolution
            .records
            .iter()
            .map(|r| r.nct_number.as_str())
            .collect()
    }

    fn three_pages(source: &MockSource) {
        source.pages(
            "aspirin",
            vec![
                vec![make_study("NCT1", "A", &["Canada"]), make_study("NCT2", "A", &["Canada"])],
                vec![make_study("NCT3", "A", &["Canada"]), make_study("NCT4", "A", &["Canada"])],
                vec![make_study("NCT5", "A", &["Canada"]), make_study("NCT6", "A", &["Canada"])],
            ],
        );
    }

    #[tokio::test]
    async fn test_merges_pages_in_order() {
        let source = Arc::new(MockSource::new());
        three_pages(&source);
        let resolver = resolver(source.clone(), Arc::new(MemoryCacheStore::new()), 10);

        let resolution = resolver
            .resolve("aspirin", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ids(&resolution), vec!["NCT1", "NCT2", "NCT3", "NCT4", "NCT5", "NCT6"]);
        assert_eq!(resolution.pages, 3);
        assert!(!resolution.truncated);
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test]
    async fn test_idempotent_with_warm_cache() {
        let source = Arc::new(MockSource::new());
        three_pages(&source);
        let resolver = resolver(source.clone(), Arc::new(MemoryCacheStore::new()), 10);
        let cancel = CancellationToken::new();

        let first = resolver.resolve("aspirin", &cancel).await.unwrap();
        let calls_after_first = source.call_count();
        let second = resolver.resolve("aspirin", &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn test_page_cap_returns_partial() {
        let source = Arc::new(MockSource::new());
        three_pages(&source);
        let resolver = resolver(source.clone(), Arc::new(MemoryCacheStore::new()), 2);

        let resolution = resolver
            .resolve("aspirin", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ids(&resolution), vec!["NCT1", "NCT2", "NCT3", "NCT4"]);
        assert!(resolution.truncated);
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_records_skipped() {
        let source = Arc::new(MockSource::new());
        source.pages(
            "aspirin",
            vec![vec![
                make_study("NCT1", "A", &["Canada"]),
                json!({"protocolSection": {}}),
                make_study("NCT2", "A", &["Canada"]),
            ]],
        );
        let resolver = resolver(source, Arc::new(MemoryCacheStore::new()), 10);

        let resolution = resolver
            .resolve("aspirin", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ids(&resolution), vec!["NCT1", "NCT2"]);
        assert_eq!(resolution.skipped, 1);
    }

    #[tokio::test]
    async fn test_failure_on_later_page_discards_partial() {
        let source = Arc::new(MockSource::new());
        let first = Query::first_page("aspirin");
        source.respond(
            first.clone(),
            vec![Ok(page_body(vec![make_study("NCT1", "A", &["Canada"])], Some("p2")))],
        );
        source.respond(
            first.next_page("p2"),
            vec![Err(SourceError::Network("reset".to_string()))],
        );
        let resolver = resolver(source, Arc::new(MemoryCacheStore::new()), 10);

        let err = resolver
            .resolve("aspirin", &CancellationToken::new())
            .await
            .unwrap_err();

        let ResolveError::ResolutionFailed { query, source } = err;
        assert_eq!(query, "aspirin");
        assert!(matches!(source, FetchError::FetchFailed { .. }));
    }

    #[tokio::test]
    async fn test_empty_token_ends_pagination() {
        let source = Arc::new(MockSource::new());
        source.respond(
            Query::first_page("aspirin"),
            vec![Ok(page_body(vec![make_study("NCT1", "A", &["Canada"])], Some("")))],
        );
        let resolver = resolver(source.clone(), Arc::new(MemoryCacheStore::new()), 10);

        let resolution = resolver
            .resolve("aspirin", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resolution.pages, 1);
        assert_eq!(source.call_count(), 1);
    }
}
