//! # Trial Harvest
//!
//! Retrieves clinical-trial records for a list of products from
//! ClinicalTrials.gov, keeps trials with a site in North America or Europe,
//! and deduplicates them per product.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: Core data structures (TrialRecord, Query, ProductResult, etc.)
//! - [`sources`]: The remote registry boundary behind the [`TrialSource`] trait
//! - [`pipeline`]: Fetcher, resolver, filter, aggregator and run driver
//! - [`workbook`]: Product list input and trial export
//! - [`utils`]: Response cache, deduplication, retry and HTTP utilities
//! - [`config`]: Configuration management
//! - [`ui`]: Terminal progress and summary tables for the CLI

pub mod config;
pub mod models;
pub mod pipeline;
pub mod sources;
pub mod ui;
pub mod utils;
pub mod workbook;

// Re-export commonly used types
pub use models::{ProductQuery, ProductResult, RunReport, TrialRecord};
pub use pipeline::{Aggregator, Harvester};
pub use sources::{ClinicalTrialsGovSource, TrialSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
