//! Memoized computation layer.
//!
//! ```text
//!   Selection ──▶ selection::normalize ──▶ SelectionKey
//!                                            │
//!                                            ▼
//!   ┌────────────┐   get/set    ┌──────────────────────────────┐
//!   │ Aggregator │ ───────────▶ │ CacheBackend                 │
//!   │ single-    │              │  NullBackend   (no storage)  │
//!   │ flight     │              │  MemoryBackend (in process)  │
//!   └────────────┘              │  FileBackend   (shared dir)  │
//!        │ on miss              └──────────────────────────────┘
//!        ▼
//!   filter → group by dose → CostModel::charge → CacheEntry
//! ```

pub mod aggregator;
pub mod backend;
pub mod cost;
pub mod entry;
pub mod file;
pub mod memory;
pub mod selection;

pub use aggregator::{
    AggregateError, Aggregator, AggregatorBuilder, AggregatorStats, BackendFailure, CachePolicy,
};
pub use backend::{CacheBackend, CacheError, NullBackend};
pub use cost::{CostModel, FixedDelay, NoCost};
pub use entry::{AggregateResult, CacheEntry, DoseTotal};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use selection::{Selection, SelectionKey};
