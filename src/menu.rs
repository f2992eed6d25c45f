// src/menu.rs

use crate::config::{APP_NAME, DOC_URL};

use eframe::egui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    LoadHw,
    Quit,
    Documentation,
    Support,
    About,
}

pub struct MenuItem {
    pub label: &'static str,
    pub tooltip: &'static str,
    pub action: MenuAction,
}

pub struct Menu {
    pub label: &'static str,
    pub items: &'static [MenuItem],
}

pub static MENU_BAR: &[Menu] = &[
    Menu {
        label: "File",
        items: &[
            MenuItem {
                label: "Load HW",
                tooltip: "Load HW",
                action: MenuAction::LoadHw,
            },
            MenuItem {
                label: "Quit",
                tooltip: "Quit",
                action: MenuAction::Quit,
            },
        ],
    },
    Menu {
        label: "Help",
        items: &[
            MenuItem {
                label: "Documentation",
                tooltip: "Documentation",
                action: MenuAction::Documentation,
            },
            MenuItem {
                label: "Support",
                tooltip: "Support",
                action: MenuAction::Support,
            },
            MenuItem {
                label: "About",
                tooltip: "About",
                action: MenuAction::About,
            },
        ],
    },
];

/// Dessine la barre de menus et renvoie l'action choisie, s'il y en a une
pub fn menu_bar_ui(ui: &mut egui::Ui) -> Option<MenuAction> {
    let mut chosen = None;
    egui::menu::bar(ui, |ui| {
        for menu in MENU_BAR {
            ui.menu_button(menu.label, |ui| {
                for item in menu.items {
                    if ui.button(item.label).on_hover_text(item.tooltip).clicked() {
                        chosen = Some(item.action);
                        ui.close_menu();
                    }
                }
            });
        }
    });
    chosen
}

pub const DESCRIPTION: &str = "Graphical front-end to browse register maps described by \
connection and address table files, and to monitor register values of IPbus targets.";

pub const LICENSE: &str = "This program is free software; you can redistribute it and/or \
modify it under the terms of the GNU General Public License as published by the Free \
Software Foundation; either version 2 of the License, or (at your option) any later version.\n\n\
It is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even \
the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU \
General Public License for more details.";

/// Boîte "About" statique
pub fn about_window(ctx: &egui::Context, open: &mut bool) {
    egui::Window::new(format!("About {}", APP_NAME))
        .open(open)
        .collapsible(false)
        .resizable(false)
        .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
        .show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.heading(APP_NAME);
                ui.label(format!("Version {}", env!("CARGO_PKG_VERSION")));
            });
            ui.separator();
            ui.label(DESCRIPTION);
            ui.hyperlink(DOC_URL);
            ui.separator();
            ui.collapsing("License", |ui| {
                ui.small(LICENSE);
            });
            ui.label(format!("Authors: {}", env!("CARGO_PKG_AUTHORS")));
        });
}
