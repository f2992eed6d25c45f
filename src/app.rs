// src/app.rs

use crate::config::{DOC_URL, READY_QUEUE_DEPTH, SUPPORT_URL};
use crate::error::{HwError, Result};
use crate::hardware::HardwareStruct;
use crate::menu::{about_window, menu_bar_ui, MenuAction};
use crate::monitoring::{default_opener, BusOpener, HardwareMonitoring, HwReady, MonitorHandle};
use crate::panels::{ControlRequest, HardwareTablePanel, HardwareTree, RefreshButtonsPanel};

use crossbeam_channel::{bounded, Receiver, Sender};
use eframe::egui;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sélection du fichier de connexion
pub trait ConnectionPicker {
    /// None si l'utilisateur annule
    fn pick(&mut self, start_dir: &Path) -> Option<PathBuf>;
}

/// Dialogue natif (rfd)
pub struct NativePicker;

impl ConnectionPicker for NativePicker {
    fn pick(&mut self, start_dir: &Path) -> Option<PathBuf> {
        // Le dialogue est libéré au retour, quelle que soit l'issue
        rfd::FileDialog::new()
            .set_title("Choose connection file")
            .set_directory(start_dir)
            .set_file_name("gui")
            .add_filter("XML files (*.xml)", &["xml"])
            .add_filter("All files (*.*)", &["*"])
            .pick_file()
    }
}

const READ_ERRORS: &str = "❌ Read errors on";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    NoHardwareLoaded,
    HardwareLoaded,
    Monitoring,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAnswer {
    Confirm,
    Cancel,
}

pub struct MainWindow {
    ctx: egui::Context,
    hw: Option<HardwareStruct>,
    /// Incrémentée à chaque chargement ; les événements d'une autre génération sont ignorés
    generation: u64,
    monitors: Vec<MonitorHandle>,
    ready_tx: Sender<HwReady>,
    ready_rx: Receiver<HwReady>,
    bus_opener: BusOpener,
    picker: Box<dyn ConnectionPicker>,

    hw_tree: Option<HardwareTree>,
    refresh_buttons_panel: RefreshButtonsPanel,
    hw_table_panel: HardwareTablePanel,

    status: String,
    confirm_close: bool,
    show_about: bool,
    closed: bool,
}

impl MainWindow {
    pub fn new(
        ctx: egui::Context,
        picker: Box<dyn ConnectionPicker>,
        bus_opener: BusOpener,
        period_ms: u64,
    ) -> Self {
        // File bornée : les workers sautent une image si la fenêtre ne suit pas
        let (ready_tx, ready_rx) = bounded(READY_QUEUE_DEPTH);
        Self {
            ctx,
            hw: None,
            generation: 0,
            monitors: Vec::new(),
            ready_tx,
            ready_rx,
            bus_opener,
            picker,
            hw_tree: None,
            refresh_buttons_panel: RefreshButtonsPanel::new(period_ms),
            hw_table_panel: HardwareTablePanel::new(),
            status: "Ready".to_string(),
            confirm_close: false,
            show_about: false,
            closed: false,
        }
    }

    pub fn from_creation_context(
        cc: &eframe::CreationContext<'_>,
        connections: Option<PathBuf>,
        period_ms: u64,
    ) -> Self {
        let mut window = Self::new(
            cc.egui_ctx.clone(),
            Box::new(NativePicker),
            default_opener(),
            period_ms,
        );
        if let Some(path) = connections {
            window.load_from(&path);
        }
        window
    }

    pub fn state(&self) -> WindowState {
        if self.closed {
            WindowState::Closed
        } else if self.hw.is_none() {
            WindowState::NoHardwareLoaded
        } else if self
            .monitors
            .iter()
            .any(|m| m.generation() == self.generation && !m.is_finished())
        {
            WindowState::Monitoring
        } else {
            WindowState::HardwareLoaded
        }
    }

    pub fn hardware(&self) -> Option<&HardwareStruct> {
        self.hw.as_ref()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    fn hw_is_valid(&self) -> bool {
        self.hw.is_some()
    }

    fn report_error(&mut self, context: &str, err: &HwError) {
        log::error!("{}: {}", context, err);
        self.status = format!("❌ {}: {}", context, err);
    }

    pub fn handle_menu(&mut self, action: MenuAction) {
        match action {
            MenuAction::LoadHw => self.load_hardware(),
            MenuAction::Quit => self.request_close(),
            MenuAction::Documentation => self.open_url(DOC_URL),
            MenuAction::Support => self.open_url(SUPPORT_URL),
            MenuAction::About => self.show_about = true,
        }
    }

    fn open_url(&self, url: &str) {
        self.ctx
            .output_mut(|o| o.open_url = Some(egui::output::OpenUrl::new_tab(url)));
    }

    /// File → Load HW
    pub fn load_hardware(&mut self) {
        let start_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        match self.picker.pick(&start_dir) {
            Some(path) => {
                self.load_from(&path);
            }
            None => log::debug!("Sélection du fichier de connexion annulée"),
        }
    }

    /// Charge un fichier de connexion ; en cas d'échec l'état précédent est conservé
    pub fn load_from(&mut self, path: &Path) -> bool {
        let hw = match HardwareStruct::from_connection_file(path) {
            Ok(hw) => hw,
            Err(e) => {
                self.report_error("Could not load hardware", &e);
                return false;
            }
        };

        // Les workers liés à l'ancien handle n'ont plus de raison d'être
        self.monitors.clear();
        self.generation += 1;

        self.status = format!(
            "✅ Loaded {} ({} device(s), {} register(s))",
            path.display(),
            hw.devices.len(),
            hw.register_count()
        );
        self.hw = Some(hw);
        self.create_hardware_tree();
        if let Some(hw) = &self.hw {
            self.hw_table_panel.draw_hw_naked_tables(hw);
        }
        true
    }

    fn create_hardware_tree(&mut self) {
        match &self.hw {
            Some(hw) => {
                let mut tree = HardwareTree::new(hw);
                tree.show();
                self.hw_tree = Some(tree);
            }
            None => self.report_error("Could not start hardware tree", &HwError::NoHardware),
        }
    }

    /// Demandé par le panneau de commande
    pub fn start_hw_thread(&mut self, period: Duration) -> Result<()> {
        log::debug!("Démarrage du monitoring demandé");
        let hw = match &self.hw {
            Some(hw) => hw.clone(),
            None => {
                self.report_error("Could not start HW update thread", &HwError::NoHardware);
                return Err(HwError::NoHardware);
            }
        };

        let worker = HardwareMonitoring::new(
            self.ctx.clone(),
            hw,
            self.ready_tx.clone(),
            self.generation,
            period,
        )
        .with_opener(self.bus_opener.clone());

        match worker.start() {
            Ok(handle) => {
                self.monitors.push(handle);
                self.status = format!("▶ Monitoring every {} ms", period.as_millis());
                Ok(())
            }
            Err(e) => {
                self.report_error("Could not start HW update thread", &e);
                Err(e)
            }
        }
    }

    pub fn on_hw_ready(&mut self, event: HwReady) {
        if event.generation != self.generation {
            log::debug!(
                "Événement périmé ignoré (génération {} au lieu de {})",
                event.generation,
                self.generation
            );
            return;
        }

        log::debug!("HW READY");
        let hw = event.get_event_info();
        self.hw_table_panel.on_hw_ready(&hw);
        if let Some(tree) = &mut self.hw_tree {
            tree.redraw(&hw);
        }

        let failing: Vec<&str> = hw
            .devices
            .iter()
            .filter(|d| d.status.is_some())
            .map(|d| d.id.as_str())
            .collect();
        if !failing.is_empty() {
            self.status = format!("{} {}", READ_ERRORS, failing.join(", "));
        } else if self.status.starts_with(READ_ERRORS) {
            self.status = "✅ All devices read".to_string();
        }

        self.hw = Some(hw);
    }

    /// Vide le canal des workers, dans l'ordre d'arrivée
    pub fn drain_ready_events(&mut self) {
        while let Ok(event) = self.ready_rx.try_recv() {
            self.on_hw_ready(event);
        }
    }

    pub fn request_close(&mut self) {
        self.confirm_close = true;
    }

    /// Réponse au dialogue "Confirm Exit" ; true si la fenêtre doit être détruite
    pub fn answer_close(&mut self, answer: CloseAnswer) -> bool {
        self.confirm_close = false;
        if answer == CloseAnswer::Confirm {
            self.closed = true;
            self.monitors.clear();
        }
        self.closed
    }

    fn confirm_close_ui(&mut self, ctx: &egui::Context) -> Option<CloseAnswer> {
        let mut answer = None;
        egui::Window::new("Confirm Exit")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label("Do you really want to close this GUI?");
                ui.horizontal(|ui| {
                    if ui.button("OK").clicked() {
                        answer = Some(CloseAnswer::Confirm);
                    }
                    if ui.button("Cancel").clicked() {
                        answer = Some(CloseAnswer::Cancel);
                    }
                });
            });
        answer
    }

    /// Une image complète de la fenêtre ; `close_requested` vient du système
    fn frame_ui(&mut self, ctx: &egui::Context, close_requested: bool) {
        self.drain_ready_events();

        if close_requested && !self.closed {
            ctx.send_viewport_cmd(egui::ViewportCommand::CancelClose);
            self.request_close();
        }

        // Dialogue modal : le reste de la fenêtre est inactif
        let enabled = !self.confirm_close;
        let mut menu_action = None;
        let mut request = None;

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            ui.add_enabled_ui(enabled, |ui| {
                menu_action = menu_bar_ui(ui);
            });
        });

        let state = self.state();
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(&self.status);
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.weak(format!("{:?}", state));
                });
            });
        });

        let hw_loaded = self.hw_is_valid();
        egui::TopBottomPanel::top("refresh_buttons").show(ctx, |ui| {
            ui.add_enabled_ui(enabled, |ui| {
                request = self.refresh_buttons_panel.ui(ui, hw_loaded);
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_enabled_ui(enabled, |ui| {
                self.hw_table_panel.ui(ui);
            });
        });

        if let Some(tree) = &mut self.hw_tree {
            tree.ui(ctx);
        }
        about_window(ctx, &mut self.show_about);

        if let Some(action) = menu_action {
            self.handle_menu(action);
        }
        if let Some(ControlRequest::StartMonitoring { period }) = request {
            // L'erreur est déjà affichée dans la barre d'état
            let _ = self.start_hw_thread(period);
        }

        if self.confirm_close {
            if let Some(answer) = self.confirm_close_ui(ctx) {
                if self.answer_close(answer) {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
            }
        }
    }
}

impl eframe::App for MainWindow {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let close_requested = ctx.input(|i| i.viewport().close_requested());
        self.frame_ui(ctx, close_requested);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.monitors.clear();
    }
}
