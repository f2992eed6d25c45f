mod app;
mod backend;
mod config;
mod error;
mod hardware;
mod ipbus;
mod menu;
mod monitoring;
mod panels;

use app::MainWindow;
use clap::Parser;
use config::{APP_NAME, DEFAULT_PERIOD_MS, MIN_WINDOW_SIZE, WINDOW_SIZE};
use eframe::egui;
use std::path::PathBuf;

/// Visualiseur et moniteur de tables de registres
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fichier de connexion à charger au démarrage
    #[arg(short, long)]
    connections: Option<PathBuf>,

    /// Période de rafraîchissement du monitoring, en millisecondes
    #[arg(short, long, default_value_t = DEFAULT_PERIOD_MS)]
    period_ms: u64,
}

fn main() -> Result<(), eframe::Error> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(APP_NAME)
            .with_inner_size(WINDOW_SIZE)
            .with_min_inner_size(MIN_WINDOW_SIZE),
        ..Default::default()
    };

    eframe::run_native(
        APP_NAME,
        options,
        Box::new(move |cc| {
            Box::new(MainWindow::from_creation_context(
                cc,
                args.connections,
                args.period_ms,
            ))
        }),
    )
}
