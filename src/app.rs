use std::sync::Arc;
use std::time::Duration;

use dose_dashboard::memo::Aggregator;
use eframe::egui;

use crate::state::AppState;
use crate::ui::{panels, plot, table};

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct DashboardApp {
    pub state: AppState,
}

impl DashboardApp {
    pub fn new(aggregator: Arc<Aggregator>, wait_timeout: Option<Duration>) -> Self {
        Self {
            state: AppState::new(aggregator, wait_timeout),
        }
    }
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ---- Left side panel: filters ----
        egui::SidePanel::left("filter_panel")
            .default_width(220.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &mut self.state);
            });

        // Views already holding the current selection skip this.
        let repaint = ctx.clone();
        self.state.refresh(move || repaint.request_repaint());

        // ---- Top panel: status bar ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &self.state);
        });

        // ---- Bottom panel: tables ----
        if self.state.show_totals || self.state.show_rows {
            egui::TopBottomPanel::bottom("tables")
                .resizable(true)
                .default_height(240.0)
                .show(ctx, |ui| {
                    egui::ScrollArea::vertical().show(ui, |ui| {
                        if self.state.show_totals {
                            egui::CollapsingHeader::new("Deaths per vaccination status")
                                .default_open(true)
                                .show(ui, |ui| table::totals_table(ui, &self.state));
                        }
                        if self.state.show_rows {
                            egui::CollapsingHeader::new("Matching records")
                                .default_open(true)
                                .show(ui, |ui| table::records_table(ui, &mut self.state));
                        }
                    });
                });
        }

        // ---- Central panel: chart ----
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Deaths by vaccination status");
            plot::deaths_chart(ui, &self.state);
        });
    }
}
