use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// CellValue – a single raw cell of the source file
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value, kept for every column of the source file so
/// tables can show columns the aggregation does not care about.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    String(String),
    Integer(i64),
    Float(f64),
    Null,
}

impl Eq for CellValue {}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use CellValue::*;
        fn discriminant(v: &CellValue) -> u8 {
            match v {
                Null => 0,
                Integer(_) => 1,
                Float(_) => 2,
                String(_) => 3,
            }
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => discriminant(self).cmp(&discriminant(other)),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Null => write!(f, ""),
        }
    }
}

impl CellValue {
    /// Guess the narrowest type for a raw text cell.
    pub fn guess(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return CellValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return CellValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return CellValue::Float(f);
        }
        CellValue::String(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// DeathRecord – one row of the source file
// ---------------------------------------------------------------------------

/// The typed fields the aggregation works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    pub sex: String,
    pub age: u32,
    pub dose_status: String,
    pub reported_deaths: u64,
}

impl DeathRecord {
    pub fn new(sex: &str, age: u32, dose_status: &str, reported_deaths: u64) -> Self {
        Self {
            sex: sex.to_string(),
            age,
            dose_status: dose_status.to_string(),
            reported_deaths,
        }
    }
}

// ---------------------------------------------------------------------------
// AgeRange – inclusive age bounds
// ---------------------------------------------------------------------------

/// Inclusive `[lo, hi]` age bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgeRange {
    pub lo: u32,
    pub hi: u32,
}

impl AgeRange {
    pub fn new(lo: u32, hi: u32) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, age: u32) -> bool {
        self.lo <= age && age <= self.hi
    }
}

// ---------------------------------------------------------------------------
// Dataset – the complete loaded dataset
// ---------------------------------------------------------------------------

/// The full parsed dataset with pre-computed indices. Never mutated after load.
#[derive(Debug, Clone)]
pub struct Dataset {
    records: Vec<DeathRecord>,
    /// Source header order.
    column_names: Vec<String>,
    /// Raw cells per row, aligned with `column_names`.
    cells: Vec<Vec<CellValue>>,
    sexes: BTreeSet<String>,
    age_span: Option<AgeRange>,
    /// SHA-256 over the records in order.
    digest: String,
}

impl Dataset {
    /// Build a dataset from typed records and their raw cells.
    ///
    /// `cells` may be empty (datasets built in code); otherwise it must hold
    /// one row per record.
    pub fn new(
        records: Vec<DeathRecord>,
        column_names: Vec<String>,
        cells: Vec<Vec<CellValue>>,
    ) -> Self {
        debug_assert!(cells.is_empty() || cells.len() == records.len());

        let sexes: BTreeSet<String> = records.iter().map(|r| r.sex.clone()).collect();
        let age_span = records.iter().fold(None, |span: Option<AgeRange>, r| {
            Some(match span {
                None => AgeRange::new(r.age, r.age),
                Some(s) => AgeRange::new(s.lo.min(r.age), s.hi.max(r.age)),
            })
        });

        let digest = records_digest(&records);

        Dataset {
            records,
            column_names,
            cells,
            sexes,
            age_span,
            digest,
        }
    }

    /// Build a dataset without raw cells.
    pub fn from_records(records: Vec<DeathRecord>) -> Self {
        Self::new(records, Vec::new(), Vec::new())
    }

    pub fn records(&self) -> &[DeathRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&DeathRecord> {
        self.records.get(index)
    }

    /// Sorted set of sex labels present in the data.
    pub fn distinct_sexes(&self) -> &BTreeSet<String> {
        &self.sexes
    }

    /// Observed `[min, max]` age, `None` for an empty dataset.
    pub fn age_span(&self) -> Option<AgeRange> {
        self.age_span
    }

    /// Hex SHA-256 of the records. Datasets that differ in any record, or in
    /// record order, have different digests.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Column names in source order.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Raw cells of `indices` over the requested columns. Unknown columns are
    /// skipped, so the returned header may be shorter than `columns`.
    pub fn project<'a>(&'a self, indices: &[usize], columns: &[String]) -> Projection<'a> {
        let picked: Vec<(usize, String)> = columns
            .iter()
            .filter_map(|c| {
                self.column_names
                    .iter()
                    .position(|n| n == c)
                    .map(|i| (i, c.clone()))
            })
            .collect();

        let rows = indices
            .iter()
            .filter_map(|&row| self.cells.get(row))
            .map(|cells| {
                picked
                    .iter()
                    .map(|(i, _)| cells.get(*i).unwrap_or(&MISSING_CELL))
                    .collect()
            })
            .collect();

        Projection {
            columns: picked.into_iter().map(|(_, c)| c).collect(),
            rows,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Stands in for cells a short row does not have.
static MISSING_CELL: CellValue = CellValue::Null;

fn records_digest(records: &[DeathRecord]) -> String {
    let mut hasher = Sha256::new();
    for r in records {
        hasher.update(r.sex.as_bytes());
        hasher.update([0]);
        hasher.update(r.age.to_le_bytes());
        hasher.update(r.dose_status.as_bytes());
        hasher.update([0]);
        hasher.update(r.reported_deaths.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// A borrowed view over selected rows and columns of a [`Dataset`].
#[derive(Debug, Clone, PartialEq)]
pub struct Projection<'a> {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<&'a CellValue>>,
}
