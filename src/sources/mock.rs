//! Mock source for testing purposes.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::models::Query;
use crate::sources::{SourceError, TrialSource};

/// A mock source that replays scripted responses per page query.
///
/// Each query has a queue of responses; calls pop from the front, and the
/// last response in a queue is repeated once the rest are used up. Queries
/// with no script answer with an empty final page.
#[derive(Debug, Default)]
pub struct MockSource {
    scripts: Mutex<HashMap<Query, VecDeque<Result<String, SourceError>>>>,
    calls: AtomicUsize,
    log: Mutex<Vec<Query>>,
}

impl MockSource {
    /// Create a new mock source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the responses for one page query.
    pub fn respond(&self, query: Query, responses: Vec<Result<String, SourceError>>) {
        let mut guard = self.scripts.lock().unwrap();
        guard.insert(query, responses.into());
    }

    /// Script a chain of pages for `query_text`, linked by tokens `p2`, `p3`, ...
    pub fn pages(&self, query_text: &str, pages: Vec<Vec<Value>>) {
        let count = pages.len();
        let mut query = Query::first_page(query_text);
        for (idx, studies) in pages.into_iter().enumerate() {
            let next = (idx + 1 < count).then(|| format!("p{}", idx + 2));
            self.respond(query.clone(), vec![Ok(page_body(studies, next.as_deref()))]);
            if let Some(token) = next {
                query = query.next_page(token);
            }
        }
    }

    /// Make every page of `query_text` fail with `error`.
    pub fn fail(&self, query_text: &str, error: SourceError) {
        self.respond(Query::first_page(query_text), vec![Err(error)]);
    }

    /// Total number of requests served.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests served for `query`.
    pub fn calls_for(&self, query: &Query) -> usize {
        self.log.lock().unwrap().iter().filter(|q| *q == query).count()
    }
}

#[async_trait]
impl TrialSource for MockSource {
    fn id(&self) -> &str {
        "mock"
    }

    fn name(&self) -> &str {
        "Mock Source"
    }

    async fn search_page(&self, query: &Query) -> Result<String, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(query.clone());

        let mut guard = self.scripts.lock().unwrap();
        match guard.get_mut(query) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(page_body(Vec::new(), None))),
            None => Ok(page_body(Vec::new(), None)),
        }
    }
}

/// Helper function to build a registry response body.
pub fn page_body(studies: Vec<Value>, next_page_token: Option<&str>) -> String {
    let mut body = json!({ "studies": studies });
    if let Some(token) = next_page_token {
        body["nextPageToken"] = json!(token);
    }
    body.to_string()
}

/// Helper function to create a registry study payload for testing.
pub fn make_study(nct_id: &str, sponsor: &str, countries: &[&str]) -> Value {
    let locations: Vec<Value> = countries.iter().map(|c| json!({ "country": c })).collect();
    json!({
        "protocolSection": {
            "identificationModule": { "nctId": nct_id, "briefTitle": format!("Study {}", nct_id) },
            "statusModule": {
                "overallStatus": "RECRUITING",
                "startDateStruct": { "date": "2022-01-15" }
            },
            "sponsorCollaboratorsModule": { "leadSponsor": { "name": sponsor } },
            "designModule": { "phases": ["PHASE2"] },
            "conditionsModule": { "conditions": ["Condition A"] },
            "contactsLocationsModule": { "locations": locations }
        }
    })
}
