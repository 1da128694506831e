//! COVID-19 deaths by vaccination dose: dataset, filter and the memoized
//! aggregation layer behind the dashboard.
//!
//! The desktop UI lives in the `dose-dashboard` binary; everything here is
//! UI-free and safe to call from any number of threads.

pub mod config;
pub mod data;
pub mod memo;
