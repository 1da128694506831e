//! Simulated cost of the aggregation.
//!
//! The real work (filter + group-by) is cheap; the dashboard models an
//! expensive computation by charging a cost once per computed aggregate.

use std::time::Duration;

/// Charged exactly once per computation, on the computing thread.
pub trait CostModel: Send + Sync {
    fn charge(&self);
}

/// No cost at all. What tests use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCost;

impl CostModel for NoCost {
    fn charge(&self) {}
}

/// Block the computing thread for a fixed time.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl CostModel for FixedDelay {
    fn charge(&self) {
        if !self.0.is_zero() {
            std::thread::sleep(self.0);
        }
    }
}
