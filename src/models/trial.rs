//! Trial model normalized from registry study payloads.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Overall recruitment status reported by the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Recruiting,
    NotYetRecruiting,
    ActiveNotRecruiting,
    EnrollingByInvitation,
    Completed,
    Suspended,
    Terminated,
    Withdrawn,
    Unknown,
    #[serde(untagged)]
    Other(String),
}

impl TrialStatus {
    /// Map a registry status code (e.g. `ACTIVE_NOT_RECRUITING`) to a status
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "RECRUITING" => TrialStatus::Recruiting,
            "NOT_YET_RECRUITING" => TrialStatus::NotYetRecruiting,
            "ACTIVE_NOT_RECRUITING" => TrialStatus::ActiveNotRecruiting,
            "ENROLLING_BY_INVITATION" => TrialStatus::EnrollingByInvitation,
            "COMPLETED" => TrialStatus::Completed,
            "SUSPENDED" => TrialStatus::Suspended,
            "TERMINATED" => TrialStatus::Terminated,
            "WITHDRAWN" => TrialStatus::Withdrawn,
            "UNKNOWN" => TrialStatus::Unknown,
            _ => TrialStatus::Other(code.to_string()),
        }
    }

    /// Returns the display label of the status
    pub fn label(&self) -> &str {
        match self {
            TrialStatus::Recruiting => "Recruiting",
            TrialStatus::NotYetRecruiting => "Not yet recruiting",
            TrialStatus::ActiveNotRecruiting => "Active, not recruiting",
            TrialStatus::EnrollingByInvitation => "Enrolling by invitation",
            TrialStatus::Completed => "Completed",
            TrialStatus::Suspended => "Suspended",
            TrialStatus::Terminated => "Terminated",
            TrialStatus::Withdrawn => "Withdrawn",
            TrialStatus::Unknown => "Unknown",
            TrialStatus::Other(s) => s,
        }
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A single trial site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Country name as reported by the registry
    pub country: String,

    /// City, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    /// Facility name, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
}

impl Location {
    /// Create a location with only a country
    pub fn new(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            city: None,
            facility: None,
        }
    }
}

/// A clinical trial normalized from one registry study payload
///
/// Records carry no identity beyond `nct_number` and are never mutated once
/// built by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Registry identifier (e.g. `NCT01234567`), never empty
    pub nct_number: String,

    /// Brief title
    pub title: String,

    /// Lead sponsor name
    pub sponsor: String,

    /// Overall status
    pub status: TrialStatus,

    /// First reported phase code, or `Not Available`
    pub phase: String,

    /// Trial sites in registry order
    pub locations: Vec<Location>,

    /// Start date at the precision the registry reported
    pub start_date: Option<RegistryDate>,

    /// Completion date
    pub end_date: Option<RegistryDate>,

    /// Whether the trial studies an FDA-regulated drug
    pub fda_regulated: Option<bool>,

    /// Conditions studied
    pub conditions: Vec<String>,

    /// Intervention names as listed on the registry
    pub interventions: Vec<String>,
}

/// Phase reported when the registry lists none
pub const PHASE_NOT_AVAILABLE: &str = "Not Available";

impl TrialRecord {
    /// Create a record with required fields; everything else starts empty
    pub fn new(nct_number: impl Into<String>, sponsor: impl Into<String>, status: TrialStatus) -> Self {
        Self {
            nct_number: nct_number.into(),
            title: String::new(),
            sponsor: sponsor.into(),
            status,
            phase: PHASE_NOT_AVAILABLE.to_string(),
            locations: Vec::new(),
            start_date: None,
            end_date: None,
            fda_regulated: None,
            conditions: Vec::new(),
            interventions: Vec::new(),
        }
    }

    /// Add a location
    pub fn with_location(mut self, country: impl Into<String>) -> Self {
        self.locations.push(Location::new(country));
        self
    }

    /// Set the phase code
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    /// Unique countries across all sites, in first-seen order
    pub fn countries(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for location in &self.locations {
            let country = location.country.as_str();
            if !country.is_empty() && !seen.contains(&country) {
                seen.push(country);
            }
        }
        seen
    }

    /// Parse a raw study payload from the registry's v2 JSON format
    pub fn from_study(raw: &serde_json::Value) -> Result<Self, RecordError> {
        let study = Study::deserialize(raw).map_err(|e| RecordError::Malformed(e.to_string()))?;
        let section = study.protocol_section;

        let nct_number = section.identification_module.nct_id.trim().to_string();
        if nct_number.is_empty() {
            return Err(RecordError::MissingId);
        }

        let status_module = section.status_module.unwrap_or_default();
        let status = status_module
            .overall_status
            .as_deref()
            .map(TrialStatus::from_code)
            .unwrap_or(TrialStatus::Unknown);

        let sponsor = section
            .sponsor_collaborators_module
            .and_then(|m| m.lead_sponsor)
            .and_then(|s| s.name)
            .ok_or_else(|| RecordError::Malformed(format!("{}: missing lead sponsor", nct_number)))?;

        let phase = section
            .design_module
            .and_then(|d| d.phases.into_iter().next())
            .unwrap_or_else(|| PHASE_NOT_AVAILABLE.to_string());

        let locations = section
            .contacts_locations_module
            .map(|m| m.locations)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|l| {
                l.country.map(|country| Location {
                    country,
                    city: l.city,
                    facility: l.facility,
                })
            })
            .collect();

        let interventions = section
            .arms_interventions_module
            .map(|m| m.interventions)
            .unwrap_or_default()
            .into_iter()
            .map(|i| i.name.unwrap_or_else(|| "Unknown intervention".to_string()))
            .collect();

        Ok(Self {
            nct_number,
            title: section.identification_module.brief_title.unwrap_or_default(),
            sponsor,
            status,
            phase,
            locations,
            start_date: status_module
                .start_date_struct
                .and_then(|d| d.date)
                .as_deref()
                .and_then(RegistryDate::parse),
            end_date: status_module
                .completion_date_struct
                .and_then(|d| d.date)
                .as_deref()
                .and_then(RegistryDate::parse),
            fda_regulated: section.oversight_module.and_then(|o| o.is_fda_regulated_drug),
            conditions: section
                .conditions_module
                .map(|c| c.conditions)
                .unwrap_or_default(),
            interventions,
        })
    }
}

/// Reasons a raw study payload could not be normalized
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("study has an empty NCT number")]
    MissingId,

    #[error("malformed study: {0}")]
    Malformed(String),
}

/// How much of a registry date was actually reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePrecision {
    Day,
    Month,
}

/// A registry date that remembers whether the day was reported
///
/// `date` of a month-precision value is the first of the month and is only
/// meant for ordering; [`Display`](std::fmt::Display) renders the value as
/// reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDate {
    pub date: NaiveDate,
    pub precision: DatePrecision,
}

impl RegistryDate {
    /// A day-precision date
    pub fn day(date: NaiveDate) -> Self {
        Self {
            date,
            precision: DatePrecision::Day,
        }
    }

    /// Parse `YYYY-MM-DD` or `YYYY-MM`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return Some(Self::day(date));
        }
        NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d")
            .ok()
            .map(|date| Self {
                date,
                precision: DatePrecision::Month,
            })
    }
}

impl std::fmt::Display for RegistryDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.precision {
            DatePrecision::Day => write!(f, "{}", self.date.format("%Y-%m-%d")),
            DatePrecision::Month => write!(f, "{}", self.date.format("%Y-%m")),
        }
    }
}

// Registry v2 wire format. Only the modules the pipeline reads are modelled.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Study {
    protocol_section: ProtocolSection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolSection {
    identification_module: IdentificationModule,
    status_module: Option<StatusModule>,
    sponsor_collaborators_module: Option<SponsorModule>,
    design_module: Option<DesignModule>,
    oversight_module: Option<OversightModule>,
    conditions_module: Option<ConditionsModule>,
    contacts_locations_module: Option<LocationsModule>,
    arms_interventions_module: Option<InterventionsModule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentificationModule {
    nct_id: String,
    brief_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusModule {
    overall_status: Option<String>,
    start_date_struct: Option<DateStruct>,
    completion_date_struct: Option<DateStruct>,
}

#[derive(Debug, Deserialize)]
struct DateStruct {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SponsorModule {
    lead_sponsor: Option<Sponsor>,
}

#[derive(Debug, Deserialize)]
struct Sponsor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DesignModule {
    #[serde(default)]
    phases: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OversightModule {
    is_fda_regulated_drug: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ConditionsModule {
    #[serde(default)]
    conditions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LocationsModule {
    #[serde(default)]
    locations: Vec<WireLocation>,
}

#[derive(Debug, Deserialize)]
struct WireLocation {
    country: Option<String>,
    city: Option<String>,
    facility: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InterventionsModule {
    #[serde(default)]
    interventions: Vec<Intervention>,
}

#[derive(Debug, Deserialize)]
struct Intervention {
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_study() -> serde_json::Value {
        json!({
            "protocolSection": {
                "identificationModule": {"nctId": "NCT00000001", "briefTitle": "A study"},
                "statusModule": {
                    "overallStatus": "ACTIVE_NOT_RECRUITING",
                    "startDateStruct": {"date": "2021-03"},
                    "completionDateStruct": {"date": "2023-11-30"}
                },
                "sponsorCollaboratorsModule": {"leadSponsor": {"name": "Acme Pharma"}},
                "designModule": {"phases": ["PHASE2", "PHASE3"]},
                "oversightModule": {"isFdaRegulatedDrug": true},
                "conditionsModule": {"conditions": ["Asthma", "COPD"]},
                "contactsLocationsModule": {"locations": [
                    {"country": "United States", "city": "Boston"},
                    {"city": "Nowhere"},
                    {"country": "Germany"}
                ]},
                "armsInterventionsModule": {"interventions": [{"name": "Drug X"}, {}]}
            }
        })
    }

    #[test]
    fn test_from_study_full() {
        let record = TrialRecord::from_study(&full_study()).unwrap();

        assert_eq!(record.nct_number, "NCT00000001");
        assert_eq!(record.sponsor, "Acme Pharma");
        assert_eq!(record.status, TrialStatus::ActiveNotRecruiting);
        assert_eq!(record.phase, "PHASE2");
        assert_eq!(record.countries(), vec!["United States", "Germany"]);
        assert_eq!(record.locations[0].city.as_deref(), Some("Boston"));
        let start = record.start_date.unwrap();
        assert_eq!(start.precision, DatePrecision::Month);
        assert_eq!(start.to_string(), "2021-03");
        assert_eq!(record.end_date.unwrap().to_string(), "2023-11-30");
        assert_eq!(record.fda_regulated, Some(true));
        assert_eq!(record.conditions, vec!["Asthma", "COPD"]);
        assert_eq!(record.interventions, vec!["Drug X", "Unknown intervention"]);
    }

    #[test]
    fn test_from_study_minimal_defaults() {
        let raw = json!({
            "protocolSection": {
                "identificationModule": {"nctId": "NCT00000002"},
                "sponsorCollaboratorsModule": {"leadSponsor": {"name": "Uni"}}
            }
        });
        let record = TrialRecord::from_study(&raw).unwrap();

        assert_eq!(record.phase, PHASE_NOT_AVAILABLE);
        assert_eq!(record.status, TrialStatus::Unknown);
        assert!(record.locations.is_empty());
        assert!(record.start_date.is_none());
        assert!(record.fda_regulated.is_none());
    }

    #[test]
    fn test_from_study_rejects_malformed() {
        assert!(matches!(
            TrialRecord::from_study(&json!({"foo": 1})),
            Err(RecordError::Malformed(_))
        ));

        let blank_id = json!({
            "protocolSection": {
                "identificationModule": {"nctId": "  "},
                "sponsorCollaboratorsModule": {"leadSponsor": {"name": "Uni"}}
            }
        });
        assert!(matches!(
            TrialRecord::from_study(&blank_id),
            Err(RecordError::MissingId)
        ));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TrialStatus::from_code("recruiting"), TrialStatus::Recruiting);
        assert_eq!(
            TrialStatus::from_code("APPROVED_FOR_MARKETING"),
            TrialStatus::Other("APPROVED_FOR_MARKETING".to_string())
        );
        assert_eq!(TrialStatus::Completed.to_string(), "Completed");
    }

    #[test]
    fn test_registry_date_keeps_precision() {
        let month = RegistryDate::parse("2020-02").unwrap();
        assert_eq!(month.date, NaiveDate::from_ymd_opt(2020, 2, 1).unwrap());
        assert_eq!(month.to_string(), "2020-02");

        let day = RegistryDate::parse(" 2020-02-29 ").unwrap();
        assert_eq!(day, RegistryDate::day(NaiveDate::from_ymd_opt(2020, 2, 29).unwrap()));
        assert_eq!(day.to_string(), "2020-02-29");

        assert_eq!(RegistryDate::parse("sometime"), None);
    }
}
