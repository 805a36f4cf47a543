//! Core data models for products, page queries and trials.

mod product;
mod query;
mod trial;

pub use product::{
    ProductFailure, ProductId, ProductQuery, ProductResult, RunReport, VariantFailure,
};
pub use query::{CacheKey, Query, RawPage};
pub use trial::{
    DatePrecision, Location, RecordError, RegistryDate, TrialRecord, TrialStatus,
    PHASE_NOT_AVAILABLE,
};
