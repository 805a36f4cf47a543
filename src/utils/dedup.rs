//! Deduplication of trial records by NCT number.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::TrialRecord;

/// Which record's field values survive when an NCT number repeats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Keep the values of the first occurrence
    FirstSeen,
    /// Keep the values of the last occurrence
    #[default]
    LastSeen,
}

/// Merge records so each NCT number appears once
///
/// Output order is the first-seen position of each NCT number regardless of
/// policy; the policy only decides which occurrence's values fill that slot.
pub fn merge_by_nct(records: Vec<TrialRecord>, policy: MergePolicy) -> Vec<TrialRecord> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut merged: Vec<TrialRecord> = Vec::with_capacity(records.len());

    for record in records {
        match slots.get(&record.nct_number) {
            Some(&idx) => {
                if policy == MergePolicy::LastSeen {
                    merged[idx] = record;
                }
            }
            None => {
                slots.insert(record.nct_number.clone(), merged.len());
                merged.push(record);
            }
        }
    }

    merged
}

/// Find NCT numbers that occur more than once, in first-seen order
pub fn find_duplicate_ids(records: &[TrialRecord]) -> Vec<&str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for record in records {
        let count = counts.entry(record.nct_number.as_str()).or_insert(0);
        *count += 1;
        if *count == 2 {
            order.push(record.nct_number.as_str());
        }
    }

    order
}
