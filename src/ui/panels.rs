use eframe::egui::{self, Color32, RichText, Ui};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Left side panel – selection widgets
// ---------------------------------------------------------------------------

/// Render the left filter panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Filters");
    ui.separator();

    // ---- Sex ----
    ui.horizontal(|ui: &mut Ui| {
        ui.strong("Sex");
        if ui.small_button("All").clicked() {
            state.select_all_sexes();
        }
    });
    let options = state.sex_options.clone();
    for sex in &options {
        let mut checked = state.selected_sexes.contains(sex);
        if ui.checkbox(&mut checked, sex.as_str()).changed() {
            state.toggle_sex(sex);
        }
    }
    if state.selected_sexes.is_empty() {
        ui.label(RichText::new("Nothing picked: showing all").italics());
    }
    ui.separator();

    // ---- Age ----
    ui.strong("Age");
    let limits = state.age_limits.lo..=state.age_limits.hi;
    let mut lo = state.age_lo;
    let mut hi = state.age_hi;
    let lo_changed = ui
        .add(egui::Slider::new(&mut lo, limits.clone()).text("from"))
        .changed();
    let hi_changed = ui
        .add(egui::Slider::new(&mut hi, limits).text("to"))
        .changed();
    if lo_changed || hi_changed {
        // Dragging one handle past the other drags both.
        if lo_changed && lo > hi {
            hi = lo;
        } else if hi_changed && hi < lo {
            lo = hi;
        }
        state.set_age_range(lo, hi);
    }
    ui.separator();

    // ---- Views ----
    ui.strong("Views");
    ui.checkbox(&mut state.show_totals, "Totals table");
    ui.checkbox(&mut state.show_rows, "Matching records");
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top status bar.
pub fn top_bar(ui: &mut Ui, state: &AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        let dataset = state.aggregator.dataset();
        ui.label(format!("{} records loaded", dataset.len()));
        ui.separator();

        let stats = state.aggregator.stats();
        ui.label(format!(
            "cache: {} ({:?}) · hits {} · misses {} · computed {} · shared {}",
            state.aggregator.backend_name(),
            state.aggregator.policy(),
            stats.hits,
            stats.misses,
            stats.computations,
            stats.coalesced,
        ));

        if state.aggregator.in_flight() > 0 {
            ui.separator();
            ui.spinner();
        }

        if let Some(msg) = state.chart.snapshot().error {
            ui.separator();
            ui.label(RichText::new(msg).color(Color32::RED));
        }
        // Failed views stay failed until the selection changes or this.
        if state.has_errors() && ui.button("Retry").clicked() {
            state.retry_failed();
        }
    });
}
