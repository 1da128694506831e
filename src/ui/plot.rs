use eframe::egui::Ui;
use egui_plot::{Bar, BarChart, Legend, Plot};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Deaths-by-dose bar chart (central panel)
// ---------------------------------------------------------------------------

/// Render the bar chart of deaths per dose status.
pub fn deaths_chart(ui: &mut Ui, state: &AppState) {
    let view = state.chart.snapshot();
    let Some(entry) = view.entry else {
        ui.centered_and_justified(|ui: &mut Ui| {
            if view.pending {
                ui.spinner();
            } else {
                ui.heading(view.error.unwrap_or_default());
            }
        });
        return;
    };

    if entry.aggregate.is_empty() {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("No records match the selection");
        });
        return;
    }

    let labels: Vec<String> = entry
        .aggregate
        .rows
        .iter()
        .map(|r| r.dose_status.clone())
        .collect();

    Plot::new("deaths_chart")
        .legend(Legend::default())
        .x_axis_label("Vaccination status")
        .y_axis_label("Deaths")
        .x_axis_formatter(move |mark, _range| {
            let i = mark.value.round();
            if (mark.value - i).abs() > f64::EPSILON || i < 0.0 {
                return String::new();
            }
            labels.get(i as usize).cloned().unwrap_or_default()
        })
        .allow_drag(false)
        .allow_scroll(false)
        .allow_boxed_zoom(false)
        .show(ui, |plot_ui| {
            // One chart per status so each gets its own legend entry.
            for (i, row) in entry.aggregate.rows.iter().enumerate() {
                let color = state.color_map.color_for(&row.dose_status);
                let bar = Bar::new(i as f64, row.total_deaths as f64)
                    .width(0.7)
                    .name(&row.dose_status);
                plot_ui.bar_chart(
                    BarChart::new(vec![bar])
                        .name(&row.dose_status)
                        .color(color),
                );
            }
        });
}
