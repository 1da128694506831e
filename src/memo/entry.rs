use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::model::Dataset;

/// Summed reported deaths for one dose status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseTotal {
    pub dose_status: String,
    pub total_deaths: u64,
}

/// Per-dose-status totals, sorted by dose status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub rows: Vec<DoseTotal>,
}

impl AggregateResult {
    /// Group `indices` of `dataset` by dose status and sum reported deaths.
    /// Indices outside the dataset are ignored.
    pub fn from_rows(dataset: &Dataset, indices: &[usize]) -> Self {
        let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
        for r in indices.iter().filter_map(|&i| dataset.record(i)) {
            let slot = totals.entry(r.dose_status.as_str()).or_default();
            *slot = slot.saturating_add(r.reported_deaths);
        }
        AggregateResult {
            rows: totals
                .into_iter()
                .map(|(dose, total)| DoseTotal {
                    dose_status: dose.to_string(),
                    total_deaths: total,
                })
                .collect(),
        }
    }

    /// `(dose_status, total)` pairs in order.
    pub fn pairs(&self) -> Vec<(&str, u64)> {
        self.rows
            .iter()
            .map(|r| (r.dose_status.as_str(), r.total_deaths))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.rows.iter().map(|r| r.total_deaths).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// What the cache stores per normalized selection: the aggregate plus the
/// filtered row indices, so tables and column pickers don't refilter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub aggregate: AggregateResult,
    pub rows: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::DeathRecord;
    use pretty_assertions::assert_eq;

    #[test]
    fn groups_and_sorts_by_dose_status() {
        let ds = Dataset::from_records(vec![
            DeathRecord::new("M", 40, "pelna", 1),
            DeathRecord::new("M", 41, "0", 5),
            DeathRecord::new("K", 42, "1", 2),
            DeathRecord::new("K", 43, "0", 3),
        ]);
        let agg = AggregateResult::from_rows(&ds, &[0, 1, 2, 3]);
        assert_eq!(agg.pairs(), vec![("0", 8), ("1", 2), ("pelna", 1)]);
        assert_eq!(agg.total(), 11);
    }

    #[test]
    fn no_rows_gives_empty_aggregate() {
        let ds = Dataset::from_records(vec![DeathRecord::new("M", 40, "0", 5)]);
        let agg = AggregateResult::from_rows(&ds, &[]);
        assert!(agg.is_empty());
        assert_eq!(agg.total(), 0);
    }
}
