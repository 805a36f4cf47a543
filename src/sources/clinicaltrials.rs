//! ClinicalTrials.gov v2 source implementation.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ApiConfig;
use crate::models::Query;
use crate::sources::{SourceError, TrialSource};
use crate::utils::HttpClient;

/// ClinicalTrials.gov studies search
///
/// Searches the intervention field (`query.intr`) and paces requests with a
/// client-side limiter shared by all clones.
#[derive(Debug, Clone)]
pub struct ClinicalTrialsGovSource {
    client: Client,
    base_url: String,
    page_size: u32,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl ClinicalTrialsGovSource {
    /// Create a source from API configuration
    pub fn new(config: &ApiConfig) -> Result<Self, SourceError> {
        let http = HttpClient::with_timeout(config.timeout())?;
        let limiter = NonZeroU32::new(config.requests_per_second)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));

        Ok(Self {
            client: http.client().clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            limiter,
        })
    }

    /// Build the request URL for a page query
    fn build_url(&self, query: &Query) -> String {
        let mut url = format!(
            "{}?query.intr={}&format=json&pageSize={}",
            self.base_url,
            urlencoding::encode(query.query_text.trim()),
            self.page_size
        );
        if let Some(token) = &query.page_token {
            url.push_str("&pageToken=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }
}

/// Parse a `Retry-After` header given in seconds
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl TrialSource for ClinicalTrialsGovSource {
    fn id(&self) -> &str {
        "ctgov"
    }

    fn name(&self) -> &str {
        "ClinicalTrials.gov"
    }

    async fn search_page(&self, query: &Query) -> Result<String, SourceError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = self.build_url(query);
        tracing::debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimit {
                retry_after: retry_after(response.headers()),
            });
        }

        if status.is_server_error() {
            return Err(SourceError::Server {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(SourceError::InvalidRequest(format!(
                "{} returned status {}: {}",
                self.name(),
                status,
                detail
            )));
        }

        Ok(response.text().await?)
    }
}
