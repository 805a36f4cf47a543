//! Integration tests for Trial Harvest
//!
//! These tests drive the full pipeline (workbook, harvester, file cache and
//! export) against a scripted source.

use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;
use trial_harvest::config::Config;
use trial_harvest::models::{Query, RunReport};
use trial_harvest::pipeline::{FetchPolicy, Fetcher, Harvester};
use trial_harvest::sources::mock::{make_study, page_body};
use trial_harvest::sources::{MockSource, SourceError};
use trial_harvest::utils::{CacheStore, FileCacheStore, MemoryCacheStore, VirtualSleeper};
use trial_harvest::workbook::{
    build_sheet, parse_workbook, write_export, ExportOptions, InputOptions, Workbook,
};

const ONCOLOGY_ID: &str = "TC Scrape Number (Duplicates removed)";

const WORKBOOK: &str = r#"{"groups": [
    {"name": "Oncology", "products": [
        {"TC Scrape Number (Duplicates removed)": 1, "Product Name": "drug-a", "Original Phase": "Phase 2"},
        {"TC Scrape Number (Duplicates removed)": 2, "Product Name": "drug b", "Original Phase": "Phase 3"},
        {"Product Name": "no id", "Original Phase": ""}
    ]},
    {"name": "Rare", "products": [
        {"bioTRAK Product ID": "R1", "Product Name": "broken", "Original Phase": "Phase 1"}
    ]},
    {"name": "Unlabelled", "products": [
        {"Product Name": "drug-a", "Original Phase": "Phase 2"}
    ]}
]}"#;

fn workbook() -> Workbook {
    parse_workbook(WORKBOOK, &InputOptions::default()).unwrap()
}

fn scripted_source() -> Arc<MockSource> {
    let source = Arc::new(MockSource::new());
    source.pages(
        "drug-a",
        vec![
            vec![
                make_study("NCT001", "Acme", &["United States", "Japan"]),
                make_study("NCT002", "Acme", &["Japan"]),
            ],
            vec![make_study("NCT003", "Acme", &["Spain"])],
        ],
    );
    source.pages(
        "drug a",
        vec![vec![
            make_study("NCT003", "Acme Europe", &["Spain"]),
            make_study("NCT004", "Acme", &["Canada"]),
        ]],
    );
    source.pages(
        "drug b",
        vec![vec![
            make_study("NCT004", "Beta", &["Canada"]),
            make_study("NCT005", "Beta", &["Sweden"]),
        ]],
    );
    source.fail("broken", SourceError::InvalidRequest("bad query".to_string()));
    source
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.pipeline.concurrency = 2;
    config.retry.rate_limit.base_delay_ms = 0;
    config.retry.transient.base_delay_ms = 0;
    config
}

fn nct_ids(report: &RunReport, product: usize) -> Vec<String> {
    report.results[product]
        .trials
        .iter()
        .map(|t| t.nct_number.clone())
        .collect()
}

#[tokio::test]
async fn test_full_run_to_export() {
    let cache_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let cache = FileCacheStore::new(cache_dir.path());
    assert_ok!(cache.initialize());

    let workbook = workbook();
    let groups = &workbook.groups;
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].len(), 2);
    assert_eq!(groups[0].id_column, ONCOLOGY_ID);
    assert_eq!(groups[1].id_column, "bioTRAK Product ID");
    assert_eq!(workbook.invalid[0].name, "Unlabelled");

    let harvester = Harvester::from_config(&test_config(), scripted_source(), Arc::new(cache));
    let cancel = CancellationToken::new();

    let mut sheets = Vec::new();
    let mut reports = Vec::new();
    for group in groups {
        let report = harvester.run(&group.products, &cancel).await;
        sheets.push(build_sheet(
            group,
            &report,
            harvester.aggregator().filter(),
            ExportOptions::default(),
        ));
        reports.push(report);
    }

    let oncology = &reports[0];
    assert_eq!(nct_ids(oncology, 0), vec!["NCT001", "NCT003", "NCT004"]);
    assert_eq!(oncology.results[0].trials[1].sponsor, "Acme Europe");
    assert_eq!(nct_ids(oncology, 1), vec!["NCT004", "NCT005"]);

    let rare = &reports[1];
    assert!(rare.results.is_empty());
    assert_eq!(rare.failures[0].product_id.as_str(), "R1");

    let path = write_export(out_dir.path(), &sheets, chrono::Local::now()).unwrap();
    let export: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(export["sheets"][0]["rows"].as_array().unwrap().len(), 5);
    assert_eq!(export["sheets"][0]["rows"][0]["locations"], "United States, Japan");
    assert_eq!(export["sheets"][0]["rows"][0][ONCOLOGY_ID], "1");
    assert_eq!(export["sheets"][0]["rows"][0]["start_date"], "2022-01-15");
    assert_eq!(export["sheets"][1]["failures"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dedup_across_products_in_export() {
    let groups = workbook().groups;
    let harvester = Harvester::from_config(
        &test_config(),
        scripted_source(),
        Arc::new(MemoryCacheStore::new()),
    );

    let report = harvester
        .run(&groups[0].products, &CancellationToken::new())
        .await;
    let sheet = build_sheet(
        &groups[0],
        &report,
        harvester.aggregator().filter(),
        ExportOptions {
            dedup_across_products: true,
        },
    );

    let ncts: Vec<&str> = sheet.rows.iter().map(|r| r.nct_number.as_str()).collect();
    assert_eq!(ncts, vec!["NCT001", "NCT003", "NCT004", "NCT005"]);
}

#[tokio::test]
async fn test_warm_file_cache_across_instances() {
    let cache_dir = tempfile::tempdir().unwrap();
    let groups = workbook().groups;
    let products = &groups[0].products;
    let source = scripted_source();
    let cancel = CancellationToken::new();

    let first = Harvester::from_config(
        &test_config(),
        source.clone(),
        Arc::new(FileCacheStore::new(cache_dir.path())),
    )
    .run(products, &cancel)
    .await;
    let calls_after_first = source.call_count();

    let second = Harvester::from_config(
        &test_config(),
        source.clone(),
        Arc::new(FileCacheStore::new(cache_dir.path())),
    )
    .run(products, &cancel)
    .await;

    assert_eq!(source.call_count(), calls_after_first);
    assert_eq!(nct_ids(&first, 0), nct_ids(&second, 0));
    assert_eq!(nct_ids(&first, 1), nct_ids(&second, 1));

    FileCacheStore::new(cache_dir.path()).clear().unwrap();
    Harvester::from_config(
        &test_config(),
        source.clone(),
        Arc::new(FileCacheStore::new(cache_dir.path())),
    )
    .run(products, &cancel)
    .await;
    assert!(source.call_count() > calls_after_first);
}

#[tokio::test]
async fn test_rate_limited_twice_then_success() {
    let source = Arc::new(MockSource::new());
    let query = Query::first_page("drug-a");
    let rate_limited = SourceError::RateLimit { retry_after: None };
    source.respond(
        query.clone(),
        vec![
            Err(rate_limited.clone()),
            Err(rate_limited),
            Ok(page_body(vec![make_study("NCT001", "Acme", &["France"])], None)),
        ],
    );
    let cache = Arc::new(MemoryCacheStore::new());
    let sleeper = Arc::new(VirtualSleeper::new());
    let fetcher = Fetcher::with_sleeper(
        source.clone(),
        cache.clone(),
        FetchPolicy::default(),
        sleeper.clone(),
    );

    let page = fetcher.fetch(&query, &CancellationToken::new()).await.unwrap();

    assert_eq!(page.records.len(), 1);
    assert_eq!(source.calls_for(&query), 3);
    assert_eq!(cache.put_count(), 1);
    let delays = sleeper.delays();
    assert_eq!(delays.len(), 2);
    assert!(delays[0] <= delays[1]);
    assert!(cache.get(&query.cache_key()).unwrap().is_some());
}

#[tokio::test]
async fn test_timeout_cancels_remaining_products() {
    let groups = workbook().groups;
    let cancel = CancellationToken::new();
    let _timer = trial_harvest::pipeline::cancel_after(cancel.clone(), Duration::from_millis(0));
    cancel.cancelled().await;

    let report = Harvester::from_config(
        &test_config(),
        scripted_source(),
        Arc::new(MemoryCacheStore::new()),
    )
    .run(&groups[0].products, &cancel)
    .await;

    assert!(report.results.is_empty());
    assert!(report.failures.iter().all(|f| f.reason == "cancelled"));
}
