/// Data layer: core types, loading, and filtering.
///
/// Architecture:
/// ```text
///  deaths.csv  (`;`-separated)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Dataset (typed records + raw cells)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  Dataset  │  Vec<DeathRecord>, sex set, age span, column names
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  sex set + age range → row indices
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
