// src/panels/refresh_buttons.rs

use crate::config::MIN_PERIOD_MS;

use eframe::egui;
use std::time::Duration;

/// Demandes du panneau de commande vers la fenêtre principale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    StartMonitoring { period: Duration },
}

pub struct RefreshButtonsPanel {
    period_ms: u64,
}

impl RefreshButtonsPanel {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms: period_ms.max(MIN_PERIOD_MS),
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn ui(&mut self, ui: &mut egui::Ui, hw_loaded: bool) -> Option<ControlRequest> {
        let mut request = None;

        ui.horizontal(|ui| {
            ui.label("Refresh period:");
            ui.add(
                egui::DragValue::new(&mut self.period_ms)
                    .clamp_range(MIN_PERIOD_MS..=60_000)
                    .speed(10)
                    .suffix(" ms"),
            );

            let button = ui
                .button("▶ Start monitoring")
                .on_hover_text("Poll every readable register of the loaded hardware");
            if button.clicked() {
                request = Some(ControlRequest::StartMonitoring {
                    period: self.period(),
                });
            }

            if !hw_loaded {
                ui.weak("(load a connection file first)");
            }
        });

        request
    }
}
