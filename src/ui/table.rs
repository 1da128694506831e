use eframe::egui::{self, RichText, Ui};
use egui_extras::{Column, TableBuilder};

use crate::state::{AppState, SlotView};

const ROW_HEIGHT: f32 = 18.0;

fn placeholder(ui: &mut Ui, view: &SlotView) -> bool {
    if view.pending {
        ui.horizontal(|ui: &mut Ui| {
            ui.spinner();
            ui.label("computing…");
        });
    }
    if let Some(err) = &view.error {
        ui.label(RichText::new(err).color(egui::Color32::RED));
    }
    view.entry.is_none()
}

// ---------------------------------------------------------------------------
// Totals per dose status
// ---------------------------------------------------------------------------

pub fn totals_table(ui: &mut Ui, state: &AppState) {
    let view = state.totals.snapshot();
    if placeholder(ui, &view) {
        return;
    }
    let Some(entry) = view.entry else { return };

    ui.push_id("totals_table", |ui: &mut Ui| {
        TableBuilder::new(ui)
            .striped(true)
            .column(Column::auto().at_least(120.0))
            .column(Column::remainder())
            .header(ROW_HEIGHT, |mut header| {
                header.col(|ui| {
                    ui.strong("Vaccination status");
                });
                header.col(|ui| {
                    ui.strong("Deaths");
                });
            })
            .body(|mut body| {
                for row in &entry.aggregate.rows {
                    body.row(ROW_HEIGHT, |mut r| {
                        r.col(|ui| {
                            ui.colored_label(
                                state.color_map.color_for(&row.dose_status),
                                row.dose_status.as_str(),
                            );
                        });
                        r.col(|ui| {
                            ui.label(row.total_deaths.to_string());
                        });
                    });
                }
                body.row(ROW_HEIGHT, |mut r| {
                    r.col(|ui| {
                        ui.strong("Total");
                    });
                    r.col(|ui| {
                        ui.strong(entry.aggregate.total().to_string());
                    });
                });
            });
    });
}

// ---------------------------------------------------------------------------
// Matching records with a column picker
// ---------------------------------------------------------------------------

pub fn records_table(ui: &mut Ui, state: &mut AppState) {
    let columns: Vec<String> = state.aggregator.dataset().column_names().to_vec();
    ui.horizontal_wrapped(|ui: &mut Ui| {
        ui.label("Columns:");
        for col in &columns {
            let mut checked = state.row_columns.contains(col);
            if ui.checkbox(&mut checked, col.as_str()).changed() {
                state.toggle_column(col);
            }
        }
    });

    let view = state.rows.snapshot();
    if placeholder(ui, &view) {
        return;
    }
    let Some(entry) = view.entry else { return };

    let visible = state.visible_columns();
    if visible.is_empty() {
        ui.label("No columns picked.");
        return;
    }
    ui.label(format!("{} matching records", entry.rows.len()));

    let dataset = state.aggregator.dataset();
    ui.push_id("records_table", |ui: &mut Ui| {
        TableBuilder::new(ui)
            .striped(true)
            .resizable(true)
            .max_scroll_height(320.0)
            .columns(Column::auto().at_least(60.0), visible.len())
            .header(ROW_HEIGHT, |mut header| {
                for col in &visible {
                    header.col(|ui| {
                        ui.strong(col.as_str());
                    });
                }
            })
            .body(|body| {
                body.rows(ROW_HEIGHT, entry.rows.len(), |mut row| {
                    let record = entry.rows[row.index()];
                    let projection = dataset.project(&[record], &visible);
                    if let Some(cells) = projection.rows.first() {
                        for cell in cells {
                            row.col(|ui| {
                                ui.label(cell.to_string());
                            });
                        }
                    }
                });
            });
    });
}
