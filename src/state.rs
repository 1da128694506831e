use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use dose_dashboard::data::model::AgeRange;
use dose_dashboard::memo::{Aggregator, CacheEntry, Selection, SelectionKey};

use crate::color::ColorMap;

/// Age range shown when the dashboard opens.
const INITIAL_AGES: (u32, u32) = (30, 80);

// ---------------------------------------------------------------------------
// ViewSlot – the result one view currently holds
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SlotInner {
    /// Bumped on every request; responses for older generations are dropped.
    generation: u64,
    key: Option<SelectionKey>,
    entry: Option<Arc<CacheEntry>>,
    pending: bool,
    error: Option<String>,
}

/// What a view should draw right now.
#[derive(Debug, Clone, Default)]
pub struct SlotView {
    /// Last result received; kept on screen while a newer one is computed.
    pub entry: Option<Arc<CacheEntry>>,
    pub pending: bool,
    pub error: Option<String>,
}

/// Holds the latest result for one view and fetches a new one off the UI
/// thread when the normalized selection changes.
#[derive(Clone, Default)]
pub struct ViewSlot {
    inner: Arc<Mutex<SlotInner>>,
}

impl ViewSlot {
    /// Ask for the aggregate of `selection`. Returns `false` without doing
    /// anything when the slot already holds (or is fetching) that key.
    /// `notify` runs on the worker thread once the result is in place.
    pub fn request<F>(
        &self,
        aggregator: &Arc<Aggregator>,
        selection: &Selection,
        timeout: Option<Duration>,
        notify: F,
    ) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let key = aggregator.key_for(selection);
        let generation = {
            let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.key.as_ref() == Some(&key) {
                return false;
            }
            slot.generation += 1;
            slot.key = Some(key.clone());
            slot.pending = true;
            slot.error = None;
            slot.generation
        };

        let inner = Arc::clone(&self.inner);
        let aggregator = Arc::clone(aggregator);
        let spawned = thread::Builder::new()
            .name("aggregate".to_string())
            .spawn(move || {
                let result = aggregator.get_by_key(&key, timeout);
                let mut slot = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.generation != generation {
                    return;
                }
                slot.pending = false;
                match result {
                    Ok(entry) => slot.entry = Some(entry),
                    Err(e) => {
                        // The key stays, so only a new selection or `retry`
                        // asks again.
                        log::error!("aggregate for {key:?} failed: {e}");
                        slot.error = Some(e.to_string());
                    }
                }
                drop(slot);
                notify();
            });

        if let Err(e) = spawned {
            log::error!("could not start aggregate worker: {e}");
            let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            slot.pending = false;
            slot.error = Some(e.to_string());
        }
        true
    }

    /// Forget a failed request so the next `request` for the same selection
    /// runs again. Does nothing unless the last request failed.
    pub fn retry(&self) -> bool {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.pending || slot.error.is_none() {
            return false;
        }
        slot.key = None;
        slot.error = None;
        true
    }

    pub fn snapshot(&self) -> SlotView {
        let slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        SlotView {
            entry: slot.entry.clone(),
            pending: slot.pending,
            error: slot.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    pub aggregator: Arc<Aggregator>,

    /// Every sex label in the dataset, sorted.
    pub sex_options: Vec<String>,
    /// Picked sexes. Empty means all.
    pub selected_sexes: BTreeSet<String>,

    /// Slider bounds.
    pub age_limits: AgeRange,
    pub age_lo: u32,
    pub age_hi: u32,

    pub color_map: ColorMap,

    /// Views, each fetching the aggregate on its own.
    pub chart: ViewSlot,
    pub totals: ViewSlot,
    pub rows: ViewSlot,

    pub show_totals: bool,
    pub show_rows: bool,
    /// Columns shown in the raw-row table.
    pub row_columns: BTreeSet<String>,

    /// How long a view waits on another view's computation.
    pub wait_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>, wait_timeout: Option<Duration>) -> Self {
        let dataset = Arc::clone(aggregator.dataset());
        let sex_options: Vec<String> = dataset.distinct_sexes().iter().cloned().collect();
        let max_age = dataset.age_span().map_or(1, |s| s.hi.max(1));
        let age_limits = AgeRange::new(1, max_age);
        let color_map = ColorMap::new(dataset.records().iter().map(|r| r.dose_status.as_str()));

        Self {
            selected_sexes: sex_options.iter().cloned().collect(),
            sex_options,
            age_limits,
            age_lo: INITIAL_AGES.0.clamp(age_limits.lo, age_limits.hi),
            age_hi: INITIAL_AGES.1.clamp(age_limits.lo, age_limits.hi),
            color_map,
            chart: ViewSlot::default(),
            totals: ViewSlot::default(),
            rows: ViewSlot::default(),
            show_totals: true,
            show_rows: false,
            row_columns: dataset.column_names().iter().cloned().collect(),
            wait_timeout,
            aggregator,
        }
    }

    /// The selection the controls currently describe.
    pub fn selection(&self) -> Selection {
        Selection {
            sexes: self.selected_sexes.clone(),
            age_range: Some(AgeRange::new(self.age_lo, self.age_hi)),
        }
    }

    /// Ask every visible view for the current selection. Views that already
    /// hold it do nothing.
    pub fn refresh<F>(&self, notify: F)
    where
        F: Fn() + Clone + Send + 'static,
    {
        let selection = self.selection();
        let mut slots = vec![&self.chart];
        if self.show_totals {
            slots.push(&self.totals);
        }
        if self.show_rows {
            slots.push(&self.rows);
        }
        for slot in slots {
            slot.request(&self.aggregator, &selection, self.wait_timeout, notify.clone());
        }
    }

    /// Clear failed views so the next `refresh` asks for them again.
    pub fn retry_failed(&self) {
        for slot in [&self.chart, &self.totals, &self.rows] {
            slot.retry();
        }
    }

    /// Whether any view is showing an error.
    pub fn has_errors(&self) -> bool {
        [&self.chart, &self.totals, &self.rows]
            .iter()
            .any(|slot| slot.snapshot().error.is_some())
    }

    /// Toggle a single sex in the selection.
    pub fn toggle_sex(&mut self, sex: &str) {
        if !self.selected_sexes.remove(sex) {
            self.selected_sexes.insert(sex.to_string());
        }
    }

    /// Select every sex.
    pub fn select_all_sexes(&mut self) {
        self.selected_sexes = self.sex_options.iter().cloned().collect();
    }

    /// Set the age range, keeping `lo <= hi` within the slider bounds.
    pub fn set_age_range(&mut self, lo: u32, hi: u32) {
        let lo = lo.clamp(self.age_limits.lo, self.age_limits.hi);
        let hi = hi.clamp(self.age_limits.lo, self.age_limits.hi);
        self.age_lo = lo.min(hi);
        self.age_hi = lo.max(hi);
    }

    /// Show or hide a column of the raw-row table.
    pub fn toggle_column(&mut self, column: &str) {
        if !self.row_columns.remove(column) {
            self.row_columns.insert(column.to_string());
        }
    }

    /// Picked columns in dataset order.
    pub fn visible_columns(&self) -> Vec<String> {
        self.aggregator
            .dataset()
            .column_names()
            .iter()
            .filter(|c| self.row_columns.contains(*c))
            .cloned()
            .collect()
    }
}
