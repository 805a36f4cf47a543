//! Resolve one intervention name against ClinicalTrials.gov and print the
//! trials with a site in North America or Europe.
//!
//! ```sh
//! cargo run --example resolve_one -- "pembrolizumab"
//! ```

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trial_harvest::config::Config;
use trial_harvest::models::ProductQuery;
use trial_harvest::sources::ClinicalTrialsGovSource;
use trial_harvest::utils::FileCacheStore;
use trial_harvest::Harvester;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "pembrolizumab".to_string());

    let mut config = Config::default();
    config.pipeline.max_pages = 3;

    let cache = FileCacheStore::from_config(&config.cache);
    cache.initialize()?;
    let source = ClinicalTrialsGovSource::new(&config.api)?;
    let harvester = Harvester::from_config(&config, Arc::new(source), Arc::new(cache));

    let product = ProductQuery::new("demo", &name, "");
    let result = harvester
        .aggregator()
        .aggregate(&product, &CancellationToken::new())
        .await?;

    println!("{} in-scope trials for {:?}", result.len(), name);
    for trial in result.trials.iter().take(10) {
        println!(
            "  {} | {} | {} | {}",
            trial.nct_number,
            trial.sponsor,
            trial.status,
            trial.countries().join(", ")
        );
    }
    if result.truncated {
        println!("(results truncated at the page cap)");
    }

    Ok(())
}
