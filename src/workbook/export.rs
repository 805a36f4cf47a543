//! Export of harvested trials, one section per product group.

use chrono::{DateTime, Local};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::input::ProductGroup;
use crate::models::{ProductFailure, RegistryDate, RunReport};
use crate::pipeline::TrialFilter;

/// Placeholder for missing dates
pub const NOT_AVAILABLE: &str = "Not Available";

/// Errors writing an export
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write export to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One exported trial for one product
///
/// Serialized with the product id under its workbook column header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    /// Workbook header the product id came from
    pub id_column: String,
    pub product_id: String,
    pub product_name: String,
    /// Intervention names as listed on the registry
    pub registry_product_name: String,
    pub original_phase: String,
    pub trial_phase: String,
    pub phase_agrees: bool,
    pub nct_number: String,
    pub sponsor: String,
    pub status: String,
    /// Unique countries, comma-joined
    pub locations: String,
    /// `YYYY-MM-DD` or `YYYY-MM`, as reported
    pub start_date: String,
    pub end_date: String,
    pub fda_regulated: bool,
    pub conditions: String,
}

impl Serialize for ExportRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(14))?;
        map.serialize_entry(&self.id_column, &self.product_id)?;
        map.serialize_entry("product_name", &self.product_name)?;
        map.serialize_entry("registry_product_name", &self.registry_product_name)?;
        map.serialize_entry("original_phase", &self.original_phase)?;
        map.serialize_entry("trial_phase", &self.trial_phase)?;
        map.serialize_entry("phase_agrees", &self.phase_agrees)?;
        map.serialize_entry("nct_number", &self.nct_number)?;
        map.serialize_entry("sponsor", &self.sponsor)?;
        map.serialize_entry("status", &self.status)?;
        map.serialize_entry("locations", &self.locations)?;
        map.serialize_entry("start_date", &self.start_date)?;
        map.serialize_entry("end_date", &self.end_date)?;
        map.serialize_entry("fda_regulated", &self.fda_regulated)?;
        map.serialize_entry("conditions", &self.conditions)?;
        map.end()
    }
}

/// Rows and failures for one product group
#[derive(Debug, Clone, Serialize)]
pub struct ExportSheet {
    pub name: String,
    pub rows: Vec<ExportRow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ProductFailure>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    /// Keep only the first row per NCT number within a sheet
    pub dedup_across_products: bool,
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    generated_at: String,
    sheets: &'a [ExportSheet],
}

fn format_date(date: Option<RegistryDate>) -> String {
    date.map(|d| d.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Flatten a group's run report into export rows
pub fn build_sheet(
    group: &ProductGroup,
    report: &RunReport,
    filter: &TrialFilter,
    options: ExportOptions,
) -> ExportSheet {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for result in &report.results {
        for trial in &result.trials {
            if options.dedup_across_products && !seen.insert(trial.nct_number.clone()) {
                continue;
            }
            let classification = filter.classify(trial, &result.original_phase);
            rows.push(ExportRow {
                id_column: group.id_column.clone(),
                product_id: result.product_id.to_string(),
                product_name: result.product_name.clone(),
                registry_product_name: trial.interventions.join(", "),
                original_phase: result.original_phase.clone(),
                trial_phase: classification.phase_label,
                phase_agrees: classification.phase_agrees,
                nct_number: trial.nct_number.clone(),
                sponsor: trial.sponsor.clone(),
                status: trial.status.to_string(),
                locations: trial.countries().join(", "),
                start_date: format_date(trial.start_date),
                end_date: format_date(trial.end_date),
                fda_regulated: trial.fda_regulated.unwrap_or(false),
                conditions: trial.conditions.join(", "),
            });
        }
    }

    ExportSheet {
        name: group.name.clone(),
        rows,
        failures: report.failures.clone(),
    }
}

/// Export file name for a run started at `at`
pub fn export_file_name(at: DateTime<Local>) -> String {
    format!("trial_export_{}.json", at.format("%Y%m%d_%H%M%S"))
}

/// Write all sheets to `<output_dir>/trial_export_<timestamp>.json`
pub fn write_export(
    output_dir: &Path,
    sheets: &[ExportSheet],
    at: DateTime<Local>,
) -> Result<PathBuf, ExportError> {
    let path = output_dir.join(export_file_name(at));
    let io_err = |source| ExportError::Io {
        path: path.clone(),
        source,
    };

    let document = ExportDocument {
        generated_at: at.to_rfc3339(),
        sheets,
    };
    let content = serde_json::to_vec_pretty(&document)?;

    std::fs::create_dir_all(output_dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(output_dir).map_err(io_err)?;
    tmp.write_all(&content).map_err(io_err)?;
    tmp.persist(&path).map_err(|e| io_err(e.error))?;

    tracing::info!(
        "Exported {} rows in {} sheets to {}",
        sheets.iter().map(|s| s.rows.len()).sum::<usize>(),
        sheets.len(),
        path.display()
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionConfig;
    use crate::models::{ProductQuery, ProductResult, TrialRecord, TrialStatus};
    use crate::pipeline::{PhaseMap, RegionSet};
    use crate::sources::mock::make_study;
    use chrono::TimeZone;

    fn group(name: &str) -> ProductGroup {
        ProductGroup {
            name: name.to_string(),
            id_column: "TC Scrape Number".to_string(),
            products: vec![],
        }
    }

    fn filter() -> TrialFilter {
        TrialFilter::new(RegionSet::from_config(&RegionConfig::default()), PhaseMap::default())
    }

    fn result(id: &str, ncts: &[&str]) -> ProductResult {
        let mut result = ProductResult::empty(&ProductQuery::new(id, format!("drug {id}"), "Phase 2"));
        result.trials = ncts
            .iter()
            .map(|nct| {
                TrialRecord::new(*nct, "Acme", TrialStatus::Recruiting)
                    .with_location("France")
                    .with_location("Germany")
                    .with_location("France")
                    .with_phase("PHASE2")
            })
            .collect();
        result
    }

    #[test]
    fn test_row_columns() {
        let report = RunReport {
            results: vec![result("1", &["NCT1"])],
            failures: vec![],
        };

        let sheet = build_sheet(&group("Oncology"), &report, &filter(), ExportOptions::default());

        let row = &sheet.rows[0];
        assert_eq!(row.product_id, "1");
        assert_eq!(row.trial_phase, "Phase 2");
        assert!(row.phase_agrees);
        assert_eq!(row.status, "Recruiting");
        assert_eq!(row.locations, "France, Germany");
        assert_eq!(row.start_date, NOT_AVAILABLE);
        assert!(!row.fda_regulated);
    }

    #[test]
    fn test_month_precision_dates_exported_as_reported() {
        let mut study = make_study("NCT7", "Acme", &["France"]);
        study["protocolSection"]["statusModule"]["startDateStruct"]["date"] = "2021-03".into();
        study["protocolSection"]["statusModule"]["completionDateStruct"] =
            serde_json::json!({ "date": "2023-11-30" });
        let mut result = ProductResult::empty(&ProductQuery::new("7", "drug", ""));
        result.trials.push(TrialRecord::from_study(&study).unwrap());
        let report = RunReport {
            results: vec![result],
            failures: vec![],
        };

        let sheet = build_sheet(&group("g"), &report, &filter(), ExportOptions::default());

        assert_eq!(sheet.rows[0].start_date, "2021-03");
        assert_eq!(sheet.rows[0].end_date, "2023-11-30");
    }

    #[test]
    fn test_dedup_across_products_keeps_first_row() {
        let report = RunReport {
            results: vec![result("1", &["NCT1", "NCT2"]), result("2", &["NCT2", "NCT3"])],
            failures: vec![],
        };

        let all = build_sheet(&group("g"), &report, &filter(), ExportOptions::default());
        let deduped = build_sheet(
            &group("g"),
            &report,
            &filter(),
            ExportOptions {
                dedup_across_products: true,
            },
        );

        assert_eq!(all.rows.len(), 4);
        let rows: Vec<(&str, &str)> = deduped
            .rows
            .iter()
            .map(|r| (r.product_id.as_str(), r.nct_number.as_str()))
            .collect();
        assert_eq!(rows, vec![("1", "NCT1"), ("1", "NCT2"), ("2", "NCT3")]);
    }

    #[test]
    fn test_write_export() {
        let dir = tempfile::tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let report = RunReport {
            results: vec![result("1", &["NCT1"])],
            failures: vec![ProductFailure {
                product_id: crate::models::ProductId::new("2"),
                product_name: "gone".to_string(),
                reason: "cancelled".to_string(),
            }],
        };
        let sheets = vec![build_sheet(&group("g"), &report, &filter(), ExportOptions::default())];

        let path = write_export(&dir.path().join("out"), &sheets, at).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "trial_export_20240305_140709.json"
        );
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["sheets"][0]["rows"][0]["nct_number"], "NCT1");
        assert_eq!(written["sheets"][0]["rows"][0]["TC Scrape Number"], "1");
        assert!(written["sheets"][0]["rows"][0].get("product_id").is_none());
        assert_eq!(written["sheets"][0]["failures"][0]["reason"], "cancelled");
    }
}
