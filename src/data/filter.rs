use std::collections::BTreeSet;

use super::model::{AgeRange, Dataset};

// ---------------------------------------------------------------------------
// Row filter: sex set + inclusive age range
// ---------------------------------------------------------------------------

/// Return indices (in dataset order) of records that pass both predicates.
///
/// A record passes when:
/// * `sexes` is `None` or empty → every sex present in the dataset passes
/// * otherwise the record's sex is in `sexes`
/// * and `lo <= age <= hi`, where a missing `age_range` means the observed
///   `[min, max]` of the dataset
///
/// An empty result is valid output.
pub fn filtered_indices(
    dataset: &Dataset,
    sexes: Option<&BTreeSet<String>>,
    age_range: Option<AgeRange>,
) -> Vec<usize> {
    let sexes = match sexes {
        Some(s) if !s.is_empty() => s,
        _ => dataset.distinct_sexes(),
    };
    let Some(ages) = age_range.or_else(|| dataset.age_span()) else {
        // No explicit range and no rows to derive one from.
        return Vec::new();
    };

    dataset
        .records()
        .iter()
        .enumerate()
        .filter(|(_, r)| sexes.contains(&r.sex) && ages.contains(r.age))
        .map(|(i, _)| i)
        .collect()
}
