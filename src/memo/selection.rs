use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::data::model::{AgeRange, Dataset};

// ---------------------------------------------------------------------------
// Selection – what the user picked
// ---------------------------------------------------------------------------

/// User-chosen filter criteria.
///
/// An empty `sexes` set means "all sexes"; a missing `age_range` means the
/// full observed range. The set is ordered, so two selections naming the
/// same sexes compare equal whatever order they were picked in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Selection {
    pub sexes: BTreeSet<String>,
    pub age_range: Option<AgeRange>,
}

impl Selection {
    /// Everything: all sexes, full age range.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_sexes<I, S>(mut self, sexes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sexes = sexes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_age_range(mut self, lo: u32, hi: u32) -> Self {
        self.age_range = Some(AgeRange::new(lo, hi));
        self
    }

    /// Resolve defaults against `dataset` and produce the canonical key.
    ///
    /// * empty sex set → every sex present in the dataset
    /// * missing age range → observed `[min, max]`
    /// * inverted bounds are swapped
    /// * bounds are clamped to the observed span, so ranges that select the
    ///   same rows share one key
    pub fn normalize(&self, dataset: &Dataset) -> SelectionKey {
        let sexes: Vec<String> = if self.sexes.is_empty() {
            dataset.distinct_sexes().iter().cloned().collect()
        } else {
            self.sexes.iter().cloned().collect()
        };

        let span = dataset.age_span();
        let requested = self.age_range.map(|r| {
            if r.lo > r.hi {
                AgeRange::new(r.hi, r.lo)
            } else {
                r
            }
        });
        let age_range = match (requested, span) {
            (Some(r), Some(s)) => {
                let clamped = AgeRange::new(r.lo.max(s.lo), r.hi.min(s.hi));
                if clamped.lo > clamped.hi {
                    // Nothing observed in range: one canonical empty key.
                    EMPTY_RANGE
                } else {
                    clamped
                }
            }
            (Some(r), None) => r,
            (None, Some(s)) => s,
            (None, None) => EMPTY_RANGE,
        };

        SelectionKey { sexes, age_range }
    }
}

/// Canonical key for a range that matches no observed age.
const EMPTY_RANGE: AgeRange = AgeRange { lo: 1, hi: 0 };

// ---------------------------------------------------------------------------
// SelectionKey – normalized, hashable cache key
// ---------------------------------------------------------------------------

/// A normalized selection: sorted, de-duplicated sexes and a resolved age
/// range. Two selections that pick the same rows map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SelectionKey {
    pub sexes: Vec<String>,
    pub age_range: AgeRange,
}

impl SelectionKey {
    /// The sex set as the filter expects it.
    pub fn sex_set(&self) -> BTreeSet<String> {
        self.sexes.iter().cloned().collect()
    }

    /// Backend key string: `namespace` followed by the key's canonical JSON.
    pub fn cache_key(&self, namespace: &str) -> String {
        // Serializing a Vec<String> and two integers cannot fail.
        let body = serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        format!("{namespace}/{body}")
    }
}
