//! Region and phase classification of trials.
//!
//! Only locations decide whether a trial is in scope. Phase is compared
//! against the product's recorded phase for reporting, never for filtering.

use std::collections::{HashMap, HashSet};

use crate::config::RegionConfig;
use crate::models::{TrialRecord, PHASE_NOT_AVAILABLE};

/// Allow-list of country names, matched case-insensitively
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSet {
    countries: HashSet<String>,
}

impl RegionSet {
    pub fn new<I, S>(countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            countries: countries
                .into_iter()
                .map(|c| normalize_country(c.as_ref()))
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &RegionConfig) -> Self {
        Self::new(config.countries())
    }

    /// Whether `country` is in the set
    pub fn contains(&self, country: &str) -> bool {
        self.countries.contains(&normalize_country(country))
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }
}

fn normalize_country(country: &str) -> String {
    country.trim().to_lowercase()
}

/// Registry phase codes and their display labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMap {
    labels: HashMap<String, String>,
}

impl Default for PhaseMap {
    fn default() -> Self {
        Self::new([
            ("EARLY_PHASE1", "Early Phase 1"),
            ("PHASE1", "Phase 1"),
            ("PHASE2", "Phase 2"),
            ("PHASE3", "Phase 3"),
            ("PHASE4", "Phase 4"),
            ("NA", "Not Applicable"),
        ])
    }
}

impl PhaseMap {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            labels: entries
                .into_iter()
                .map(|(code, label)| (code.as_ref().trim().to_ascii_uppercase(), label.into()))
                .collect(),
        }
    }

    /// Display label for a phase code; unknown codes pass through unchanged
    pub fn label<'a>(&'a self, code: &'a str) -> &'a str {
        self.labels
            .get(&code.trim().to_ascii_uppercase())
            .map(String::as_str)
            .unwrap_or(code)
    }

    /// Whether an upstream phase description names the same phase as `code`
    ///
    /// Comparison ignores case, spacing and punctuation, and reads roman
    /// numerals (`Phase II`) as digits.
    pub fn agrees(&self, original_phase: &str, code: &str) -> bool {
        let original = normalize_phase(original_phase);
        if original.is_empty() || code == PHASE_NOT_AVAILABLE {
            return false;
        }
        original == normalize_phase(code) || original == normalize_phase(self.label(code))
    }

    /// Whether a trial's reported phase matches the product's recorded phase
    pub fn phase_agrees(&self, original_phase: &str, record: &TrialRecord) -> bool {
        self.agrees(original_phase, &record.phase)
    }
}

fn normalize_phase(phase: &str) -> String {
    phase
        .split(|c: char| !c.is_alphanumeric())
        .flat_map(split_trailing_numeral)
        .map(|token| match token.to_lowercase().as_str() {
            "i" => "1".to_string(),
            "ii" => "2".to_string(),
            "iii" => "3".to_string(),
            "iv" => "4".to_string(),
            other => other.to_string(),
        })
        .collect()
}

/// Split `phase2` into `phase`, `2` so numerals normalize uniformly
fn split_trailing_numeral(token: &str) -> Vec<&str> {
    match token.find(|c: char| c.is_ascii_digit()) {
        Some(idx) if idx > 0 => vec![&token[..idx], &token[idx..]],
        _ => vec![token],
    }
}

/// Outcome of classifying one trial for one product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub in_scope: bool,
    pub phase_label: String,
    pub phase_agrees: bool,
}

/// Region and phase rules applied to resolved trials
#[derive(Debug, Clone, Default)]
pub struct TrialFilter {
    regions: RegionSet,
    phases: PhaseMap,
}

impl TrialFilter {
    pub fn new(regions: RegionSet, phases: PhaseMap) -> Self {
        Self { regions, phases }
    }

    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }

    /// A trial is in scope iff at least one site is in an allowed country
    pub fn in_scope(&self, record: &TrialRecord) -> bool {
        in_scope(record, &self.regions, &self.phases)
    }

    /// Scope plus advisory phase comparison
    pub fn classify(&self, record: &TrialRecord, original_phase: &str) -> Classification {
        Classification {
            in_scope: self.in_scope(record),
            phase_label: self.phases.label(&record.phase).to_string(),
            phase_agrees: self.phases.phase_agrees(original_phase, record),
        }
    }
}

/// Location-only scope rule; the phase map never excludes a trial
pub fn in_scope(record: &TrialRecord, regions: &RegionSet, _phases: &PhaseMap) -> bool {
    record
        .locations
        .iter()
        .any(|location| regions.contains(&location.country))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrialStatus;

    fn default_filter() -> TrialFilter {
        TrialFilter::new(
            RegionSet::from_config(&RegionConfig::default()),
            PhaseMap::default(),
        )
    }

    fn trial(countries: &[&str]) -> TrialRecord {
        countries.iter().fold(
            TrialRecord::new("NCT1", "Acme", TrialStatus::Completed),
            |record, country| record.with_location(*country),
        )
    }

    #[test]
    fn test_in_scope_any_location() {
        let filter = default_filter();
        assert!(filter.in_scope(&trial(&["Japan", "Germany"])));
        assert!(filter.in_scope(&trial(&["united states"])));
        assert!(filter.in_scope(&trial(&[" Canada "])));
        assert!(!filter.in_scope(&trial(&["Japan", "Brazil"])));
    }

    #[test]
    fn test_empty_locations_out_of_scope() {
        assert!(!default_filter().in_scope(&trial(&[])));
    }

    #[test]
    fn test_exact_country_names_only() {
        let filter = default_filter();
        assert!(!filter.in_scope(&trial(&["Germany (East)"])));
        assert!(!filter.in_scope(&trial(&["USA"])));
    }

    #[test]
    fn test_phase_never_filters() {
        let filter = default_filter();
        let record = trial(&["France"]).with_phase("PHASE4");

        let classification = filter.classify(&record, "Phase 1");

        assert!(classification.in_scope);
        assert!(!classification.phase_agrees);
        assert_eq!(classification.phase_label, "Phase 4");
    }

    #[test]
    fn test_phase_agreement() {
        let phases = PhaseMap::default();
        assert!(phases.agrees("Phase 2", "PHASE2"));
        assert!(phases.agrees("phase II", "PHASE2"));
        assert!(phases.agrees("Early Phase 1", "EARLY_PHASE1"));
        assert!(!phases.agrees("Phase 3", "PHASE2"));
        assert!(!phases.agrees("", "PHASE2"));
        assert!(!phases.agrees("Not Available", PHASE_NOT_AVAILABLE));
    }

    #[test]
    fn test_phase_label_passthrough() {
        let phases = PhaseMap::default();
        assert_eq!(phases.label("phase3"), "Phase 3");
        assert_eq!(phases.label("PHASE9"), "PHASE9");
    }
}
