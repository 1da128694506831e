//! Memoized aggregation with single-flight.
//!
//! ```text
//!  Selection ──normalize──▶ SelectionKey
//!                               │
//!                     backend.get(key) ── hit ──▶ entry
//!                               │ miss
//!                 in-flight table (one Flight per key)
//!                  │ first caller            │ later callers
//!                  ▼                         ▼
//!       re-check backend, compute,     wait on Flight's condvar
//!       store, publish to Flight ─────────▶ entry
//! ```
//!
//! The in-flight table lock is only held to look up or insert a `Flight`; the
//! computation itself runs outside it, so different keys never wait on each
//! other. A leader that unwinds without publishing marks its flight abandoned
//! and its waiters go around again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

use super::backend::{CacheBackend, CacheError, NullBackend};
use super::cost::{CostModel, NoCost};
use super::entry::{AggregateResult, CacheEntry};
use super::selection::{Selection, SelectionKey};
use crate::data::filter::filtered_indices;
use crate::data::model::Dataset;

// ---------------------------------------------------------------------------
// Policies and errors
// ---------------------------------------------------------------------------

/// Whether results are reused at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Look up the backend, coalesce concurrent misses, store results.
    #[default]
    Memoize,
    /// Compute on every request. No lookup, no store, no coalescing.
    Recompute,
}

/// What a backend error does to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendFailure {
    /// Log it and carry on as if the entry were missing.
    #[default]
    Degrade,
    /// Return the error to the caller.
    FailFast,
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("gave up after {0:?} waiting for an in-flight computation")]
    Timeout(Duration),

    #[error("cache backend '{backend}' failed during {op}")]
    Backend {
        backend: &'static str,
        op: &'static str,
        #[source]
        source: CacheError,
    },
}

// ---------------------------------------------------------------------------
// Instrumentation
// ---------------------------------------------------------------------------

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Requests received.
    pub lookups: u64,
    /// Requests answered from the backend.
    pub hits: u64,
    /// Requests that found nothing in the backend.
    pub misses: u64,
    /// Times the expensive path ran.
    pub computations: u64,
    /// Requests answered by another caller's in-flight computation.
    pub coalesced: u64,
    pub backend_errors: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct Counters {
    lookups: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    coalesced: AtomicU64,
    backend_errors: AtomicU64,
    timeouts: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Flights
// ---------------------------------------------------------------------------

enum FlightState {
    Running,
    Done(Arc<CacheEntry>),
    Abandoned,
}

struct Flight {
    state: Mutex<FlightState>,
    ready: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Running),
            ready: Condvar::new(),
        }
    }

    fn finish(&self, outcome: FlightState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = outcome;
        self.ready.notify_all();
    }
}

enum Role {
    Leader(Arc<Flight>),
    Waiter(Arc<Flight>),
}

/// Held by the computing caller. Dropping it without `publish` (early return
/// or unwind) abandons the flight so waiters are never stuck.
struct FlightGuard<'a> {
    aggregator: &'a Aggregator,
    key: &'a SelectionKey,
    flight: Arc<Flight>,
    published: bool,
}

impl FlightGuard<'_> {
    fn publish(mut self, entry: &Arc<CacheEntry>) {
        self.aggregator.retire(self.key, &self.flight);
        self.flight.finish(FlightState::Done(Arc::clone(entry)));
        self.published = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            log::warn!("computation for {:?} abandoned", self.key);
            self.aggregator.retire(self.key, &self.flight);
            self.flight.finish(FlightState::Abandoned);
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Answers "deaths per dose status for this selection", computing each
/// distinct selection at most once per process while it is cached.
///
/// Cheap to share: wrap it in an `Arc` and call it from any thread.
pub struct Aggregator {
    dataset: Arc<Dataset>,
    backend: Arc<dyn CacheBackend>,
    cost: Arc<dyn CostModel>,
    policy: CachePolicy,
    on_backend_error: BackendFailure,
    ttl: Option<Duration>,
    namespace: String,
    inflight: Mutex<HashMap<SelectionKey, Arc<Flight>>>,
    counters: Counters,
}

impl Aggregator {
    pub fn builder(dataset: Arc<Dataset>) -> AggregatorBuilder {
        AggregatorBuilder::new(dataset)
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Normalized key for `selection` against this aggregator's dataset.
    pub fn key_for(&self, selection: &Selection) -> SelectionKey {
        selection.normalize(&self.dataset)
    }

    /// Aggregate for `selection`, waiting as long as needed on another
    /// caller's computation of the same selection.
    pub fn get_aggregate(&self, selection: &Selection) -> Result<Arc<CacheEntry>, AggregateError> {
        self.get_aggregate_with_timeout(selection, None)
    }

    /// Like [`get_aggregate`](Self::get_aggregate), but gives up waiting on
    /// someone else's computation after `timeout`. The computation itself
    /// carries on and is still cached for later callers. A caller that ends
    /// up computing is not interrupted.
    pub fn get_aggregate_with_timeout(
        &self,
        selection: &Selection,
        timeout: Option<Duration>,
    ) -> Result<Arc<CacheEntry>, AggregateError> {
        let key = self.key_for(selection);
        self.get_by_key(&key, timeout)
    }

    /// Same as [`get_aggregate_with_timeout`](Self::get_aggregate_with_timeout)
    /// for an already normalized key.
    pub fn get_by_key(
        &self,
        key: &SelectionKey,
        timeout: Option<Duration>,
    ) -> Result<Arc<CacheEntry>, AggregateError> {
        bump(&self.counters.lookups);

        if self.policy == CachePolicy::Recompute {
            bump(&self.counters.misses);
            return Ok(self.compute(key));
        }

        let cache_key = key.cache_key(&self.namespace);
        if let Some(entry) = self.lookup(&cache_key)? {
            log::debug!("cache hit for {key:?}");
            bump(&self.counters.hits);
            return Ok(entry);
        }
        bump(&self.counters.misses);

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            match self.join_or_lead(key) {
                Role::Leader(flight) => return self.lead(key, &cache_key, flight),
                Role::Waiter(flight) => {
                    log::debug!("joining in-flight computation for {key:?}");
                    match self.wait(&flight, deadline, timeout)? {
                        Some(entry) => {
                            bump(&self.counters.coalesced);
                            return Ok(entry);
                        }
                        // Leader gave up; try to lead ourselves.
                        None => continue,
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> AggregatorStats {
        let c = &self.counters;
        AggregatorStats {
            lookups: c.lookups.load(Ordering::Relaxed),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            computations: c.computations.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            backend_errors: c.backend_errors.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Number of computations currently running.
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn join_or_lead(&self, key: &SelectionKey) -> Role {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = inflight.get(key) {
            return Role::Waiter(Arc::clone(flight));
        }
        let flight = Arc::new(Flight::new());
        inflight.insert(key.clone(), Arc::clone(&flight));
        Role::Leader(flight)
    }

    /// Remove `flight` from the table if it is still the registered one.
    fn retire(&self, key: &SelectionKey, flight: &Arc<Flight>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight.get(key).is_some_and(|f| Arc::ptr_eq(f, flight)) {
            inflight.remove(key);
        }
    }

    fn lead(
        &self,
        key: &SelectionKey,
        cache_key: &str,
        flight: Arc<Flight>,
    ) -> Result<Arc<CacheEntry>, AggregateError> {
        let guard = FlightGuard {
            aggregator: self,
            key,
            flight,
            published: false,
        };

        // A previous leader may have stored it between our miss and now.
        if let Some(entry) = self.lookup(cache_key)? {
            bump(&self.counters.hits);
            guard.publish(&entry);
            return Ok(entry);
        }

        let entry = self.compute(key);
        let stored = self.store(cache_key, &entry);
        // Waiters get the result even if storing it failed.
        guard.publish(&entry);
        stored.map(|()| entry)
    }

    fn wait(
        &self,
        flight: &Flight,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
    ) -> Result<Option<Arc<CacheEntry>>, AggregateError> {
        let mut state = flight.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &*state {
                FlightState::Done(entry) => return Ok(Some(Arc::clone(entry))),
                FlightState::Abandoned => return Ok(None),
                FlightState::Running => {}
            }
            state = match deadline {
                None => flight
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        bump(&self.counters.timeouts);
                        return Err(AggregateError::Timeout(timeout.unwrap_or_default()));
                    }
                    flight
                        .ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn compute(&self, key: &SelectionKey) -> Arc<CacheEntry> {
        let started = Instant::now();
        let sexes = key.sex_set();
        let rows = filtered_indices(&self.dataset, Some(&sexes), Some(key.age_range));
        let aggregate = AggregateResult::from_rows(&self.dataset, &rows);
        self.cost.charge();
        bump(&self.counters.computations);
        log::info!(
            "computed {:?}: {} rows, {} dose statuses in {:?}",
            key,
            rows.len(),
            aggregate.rows.len(),
            started.elapsed()
        );
        Arc::new(CacheEntry { aggregate, rows })
    }

    fn lookup(&self, cache_key: &str) -> Result<Option<Arc<CacheEntry>>, AggregateError> {
        match self.backend.get(cache_key) {
            Ok(found) => Ok(found),
            Err(e) => {
                self.backend_failed("get", e)?;
                Ok(None)
            }
        }
    }

    fn store(&self, cache_key: &str, entry: &Arc<CacheEntry>) -> Result<(), AggregateError> {
        match self.backend.set(cache_key, entry, self.ttl) {
            Ok(()) => Ok(()),
            Err(e) => self.backend_failed("set", e),
        }
    }

    fn backend_failed(&self, op: &'static str, source: CacheError) -> Result<(), AggregateError> {
        bump(&self.counters.backend_errors);
        let backend = self.backend.name();
        match self.on_backend_error {
            BackendFailure::Degrade => {
                log::warn!("cache backend '{backend}' {op} failed, computing directly: {source}");
                Ok(())
            }
            BackendFailure::FailFast => Err(AggregateError::Backend { backend, op, source }),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an [`Aggregator`]. Defaults: no backend (`NullBackend`), no
/// cost, memoize, degrade on backend errors, no TTL, namespace `"deaths"`.
pub struct AggregatorBuilder {
    dataset: Arc<Dataset>,
    backend: Arc<dyn CacheBackend>,
    cost: Arc<dyn CostModel>,
    policy: CachePolicy,
    on_backend_error: BackendFailure,
    ttl: Option<Duration>,
    namespace: String,
}

impl AggregatorBuilder {
    pub fn new(dataset: Arc<Dataset>) -> Self {
        Self {
            dataset,
            backend: Arc::new(NullBackend),
            cost: Arc::new(NoCost),
            policy: CachePolicy::default(),
            on_backend_error: BackendFailure::default(),
            ttl: None,
            namespace: "deaths".to_string(),
        }
    }

    pub fn backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn cost(mut self, cost: Arc<dyn CostModel>) -> Self {
        self.cost = cost;
        self
    }

    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn on_backend_error(mut self, failure: BackendFailure) -> Self {
        self.on_backend_error = failure;
        self
    }

    pub fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Prefix for every backend key. Processes sharing a store must agree on
    /// it for the same dataset and differ for different ones.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn build(self) -> Aggregator {
        log::debug!(
            "aggregator: backend={} policy={:?} on_error={:?} ttl={:?}",
            self.backend.name(),
            self.policy,
            self.on_backend_error,
            self.ttl
        );
        Aggregator {
            dataset: self.dataset,
            backend: self.backend,
            cost: self.cost,
            policy: self.policy,
            on_backend_error: self.on_backend_error,
            ttl: self.ttl,
            namespace: self.namespace,
            inflight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::DeathRecord;
    use crate::memo::cost::FixedDelay;
    use crate::memo::memory::MemoryBackend;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicBool;
    use std::sync::Barrier;
    use std::thread;

    fn scenario() -> Arc<Dataset> {
        Arc::new(Dataset::from_records(vec![
            DeathRecord::new("M", 40, "0", 5),
            DeathRecord::new("M", 45, "0", 3),
            DeathRecord::new("K", 50, "1", 2),
        ]))
    }

    fn memoizing(dataset: Arc<Dataset>) -> Aggregator {
        Aggregator::builder(dataset)
            .backend(Arc::new(MemoryBackend::new()))
            .build()
    }

    struct BrokenBackend;

    impl CacheBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn get(&self, _key: &str) -> Result<Option<Arc<CacheEntry>>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        fn set(
            &self,
            _key: &str,
            _entry: &Arc<CacheEntry>,
            _ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn sums_deaths_per_dose_for_selection() {
        let agg = memoizing(scenario());
        let sel = Selection::all().with_sexes(["M"]).with_age_range(1, 100);
        let entry = agg.get_aggregate(&sel).unwrap();
        assert_eq!(entry.aggregate.pairs(), vec![("0", 8)]);
        assert_eq!(entry.rows, vec![0, 1]);
    }

    #[test]
    fn second_request_is_a_hit() {
        let agg = memoizing(scenario());
        let sel = Selection::all().with_sexes(["M", "K"]);
        let first = agg.get_aggregate(&sel).unwrap();
        let second = agg.get_aggregate(&sel).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = agg.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn sex_order_shares_one_entry() {
        let agg = memoizing(scenario());
        let a = agg.get_aggregate(&Selection::all().with_sexes(["M", "K"])).unwrap();
        let b = agg.get_aggregate(&Selection::all().with_sexes(["K", "M"])).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(agg.stats().computations, 1);
    }

    #[test]
    fn results_are_deterministic_across_policies() {
        let ds = scenario();
        let cached = memoizing(Arc::clone(&ds));
        let fresh = Aggregator::builder(ds).policy(CachePolicy::Recompute).build();
        let sel = Selection::all().with_age_range(41, 60);
        for _ in 0..3 {
            assert_eq!(
                *cached.get_aggregate(&sel).unwrap(),
                *fresh.get_aggregate(&sel).unwrap()
            );
        }
        assert_eq!(cached.stats().computations, 1);
        assert_eq!(fresh.stats().computations, 3);
    }

    #[test]
    fn empty_selection_is_an_empty_aggregate() {
        let agg = memoizing(scenario());
        let entry = agg
            .get_aggregate(&Selection::all().with_sexes(["X"]))
            .unwrap();
        assert!(entry.aggregate.is_empty());
        assert!(entry.rows.is_empty());
    }

    #[test]
    fn ttl_expiry_recomputes_transparently() {
        let agg = Aggregator::builder(scenario())
            .backend(Arc::new(MemoryBackend::new()))
            .ttl(Some(Duration::ZERO))
            .build();
        let sel = Selection::all();
        let a = agg.get_aggregate(&sel).unwrap();
        let b = agg.get_aggregate(&sel).unwrap();
        assert_eq!(*a, *b);
        assert_eq!(agg.stats().computations, 2);
    }

    #[test]
    fn broken_backend_degrades_to_computation() {
        let agg = Aggregator::builder(scenario())
            .backend(Arc::new(BrokenBackend))
            .build();
        let entry = agg.get_aggregate(&Selection::all()).unwrap();
        assert_eq!(entry.aggregate.pairs(), vec![("0", 8), ("1", 2)]);
        let stats = agg.stats();
        // Fast-path get, leader re-check get, set.
        assert_eq!(stats.backend_errors, 3);
        assert_eq!(stats.computations, 1);
    }

    #[test]
    fn broken_backend_fails_fast_when_asked() {
        let agg = Aggregator::builder(scenario())
            .backend(Arc::new(BrokenBackend))
            .on_backend_error(BackendFailure::FailFast)
            .build();
        let err = agg.get_aggregate(&Selection::all()).unwrap_err();
        assert!(matches!(err, AggregateError::Backend { op: "get", .. }));
        assert_eq!(agg.stats().computations, 0);
        assert_eq!(agg.in_flight(), 0);
    }

    #[test]
    fn concurrent_misses_compute_once() {
        let agg = Arc::new(
            Aggregator::builder(scenario())
                .backend(Arc::new(MemoryBackend::new()))
                .cost(Arc::new(FixedDelay(Duration::from_millis(200))))
                .build(),
        );
        let callers = 8;
        let barrier = Arc::new(Barrier::new(callers));
        let handles: Vec<_> = (0..callers)
            .map(|i| {
                let agg = Arc::clone(&agg);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    // Half the callers name the sexes in the other order.
                    let sel = if i % 2 == 0 {
                        Selection::all().with_sexes(["M", "K"])
                    } else {
                        Selection::all().with_sexes(["K", "M"])
                    };
                    barrier.wait();
                    agg.get_aggregate(&sel).unwrap()
                })
            })
            .collect();
        let results: Vec<Arc<CacheEntry>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        let stats = agg.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.hits + stats.coalesced, callers as u64 - 1);
        assert_eq!(agg.in_flight(), 0);
    }

    #[test]
    fn recompute_policy_never_coalesces() {
        let agg = Arc::new(
            Aggregator::builder(scenario())
                .backend(Arc::new(MemoryBackend::new()))
                .policy(CachePolicy::Recompute)
                .cost(Arc::new(FixedDelay(Duration::from_millis(20))))
                .build(),
        );
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || agg.get_aggregate(&Selection::all()).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(agg.stats().computations, 4);
        assert_eq!(agg.stats().coalesced, 0);
    }

    #[test]
    fn independent_keys_run_in_parallel() {
        let delay = Duration::from_millis(300);
        let agg = Arc::new(
            Aggregator::builder(scenario())
                .backend(Arc::new(MemoryBackend::new()))
                .cost(Arc::new(FixedDelay(delay)))
                .build(),
        );
        let started = Instant::now();
        let handles: Vec<_> = ["M", "K"]
            .into_iter()
            .map(|sex| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || agg.get_aggregate(&Selection::all().with_sexes([sex])).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(agg.stats().computations, 2);
        assert!(started.elapsed() < delay * 2 - Duration::from_millis(20));
    }

    #[test]
    fn waiter_timeout_leaves_flight_intact() {
        let agg = Arc::new(
            Aggregator::builder(scenario())
                .backend(Arc::new(MemoryBackend::new()))
                .cost(Arc::new(FixedDelay(Duration::from_millis(400))))
                .build(),
        );
        let leader = {
            let agg = Arc::clone(&agg);
            thread::spawn(move || agg.get_aggregate(&Selection::all()).unwrap())
        };
        wait_for_flight(&agg);

        let err = agg
            .get_aggregate_with_timeout(&Selection::all(), Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, AggregateError::Timeout(_)));

        let from_leader = leader.join().unwrap();
        let later = agg.get_aggregate(&Selection::all()).unwrap();
        assert!(Arc::ptr_eq(&from_leader, &later));
        let stats = agg.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.timeouts, 1);
    }

    /// Backend that reads fine but cannot store anything.
    struct ReadOnlyBackend;

    impl CacheBackend for ReadOnlyBackend {
        fn name(&self) -> &'static str {
            "read-only"
        }

        fn get(&self, _key: &str) -> Result<Option<Arc<CacheEntry>>, CacheError> {
            Ok(None)
        }

        fn set(
            &self,
            _key: &str,
            _entry: &Arc<CacheEntry>,
            _ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("disk full".into()))
        }
    }

    fn wait_for_flight(agg: &Aggregator) {
        while agg.in_flight() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn failed_store_still_reaches_waiters_under_fail_fast() {
        let agg = Arc::new(
            Aggregator::builder(scenario())
                .backend(Arc::new(ReadOnlyBackend))
                .on_backend_error(BackendFailure::FailFast)
                .cost(Arc::new(FixedDelay(Duration::from_millis(300))))
                .build(),
        );
        let leader = {
            let agg = Arc::clone(&agg);
            thread::spawn(move || agg.get_aggregate(&Selection::all()))
        };
        wait_for_flight(&agg);

        let waited = agg.get_aggregate(&Selection::all()).unwrap();
        assert_eq!(waited.aggregate.pairs(), vec![("0", 8), ("1", 2)]);

        let err = leader.join().unwrap().unwrap_err();
        assert!(matches!(err, AggregateError::Backend { op: "set", .. }));

        let stats = agg.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.coalesced, 1);
        assert_eq!(stats.backend_errors, 1);
    }

    /// Panics on its first charge, after `delay`.
    struct PanicOnce {
        fired: AtomicBool,
        delay: Duration,
    }

    impl PanicOnce {
        fn after(delay: Duration) -> Self {
            Self {
                fired: AtomicBool::new(false),
                delay,
            }
        }
    }

    impl CostModel for PanicOnce {
        fn charge(&self) {
            if !self.fired.swap(true, Ordering::SeqCst) {
                thread::sleep(self.delay);
                panic!("worker died");
            }
        }
    }

    #[test]
    fn unwinding_leader_does_not_wedge_the_key() {
        let agg = Arc::new(
            Aggregator::builder(scenario())
                .backend(Arc::new(MemoryBackend::new()))
                .cost(Arc::new(PanicOnce::after(Duration::ZERO)))
                .build(),
        );
        let crashed = {
            let agg = Arc::clone(&agg);
            thread::spawn(move || agg.get_aggregate(&Selection::all()))
        };
        assert!(crashed.join().is_err());
        assert_eq!(agg.in_flight(), 0);

        let entry = agg.get_aggregate(&Selection::all()).unwrap();
        assert_eq!(entry.aggregate.total(), 10);
    }

    #[test]
    fn waiter_takes_over_from_an_unwinding_leader() {
        let agg = Arc::new(
            Aggregator::builder(scenario())
                .backend(Arc::new(MemoryBackend::new()))
                .cost(Arc::new(PanicOnce::after(Duration::from_millis(300))))
                .build(),
        );
        let crashed = {
            let agg = Arc::clone(&agg);
            thread::spawn(move || agg.get_aggregate(&Selection::all()))
        };
        wait_for_flight(&agg);

        // Blocks on the doomed flight, then computes itself.
        let entry = agg.get_aggregate(&Selection::all()).unwrap();
        assert_eq!(entry.aggregate.total(), 10);
        assert!(crashed.join().is_err());

        let stats = agg.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.coalesced, 0);
        assert_eq!(agg.in_flight(), 0);
    }
}
