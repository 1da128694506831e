mod app;
mod color;
mod state;
mod ui;

use std::sync::Arc;

use anyhow::{Context, anyhow};
use app::DashboardApp;
use dose_dashboard::config::DashboardConfig;
use dose_dashboard::data::loader;
use eframe::egui;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = DashboardConfig::from_env().context("reading configuration")?;
    let dataset = loader::load_file(&config.data_path, &config.columns)
        .inspect_err(|e| log::error!("could not load dataset: {e:#}"))?;
    let dataset = Arc::new(dataset);
    let aggregator = Arc::new(config.build_aggregator(dataset)?);
    log::info!(
        "cache backend '{}' ({:?}), simulated cost {:?}",
        aggregator.backend_name(),
        aggregator.policy(),
        config.compute_delay
    );

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([600.0, 400.0]),
        ..Default::default()
    };

    let wait_timeout = config.wait_timeout;
    eframe::run_native(
        "COVID-19 deaths by vaccination dose",
        options,
        Box::new(move |_cc| Ok(Box::new(DashboardApp::new(aggregator, wait_timeout)))),
    )
    .map_err(|e| anyhow!("running the dashboard: {e}"))
}
