// src/panels/hardware_table.rs

use super::format_value;
use crate::hardware::{Device, HardwareStruct, Node};

use eframe::egui;

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterRow {
    pub path: String,
    pub address: u32,
    pub mask: u32,
    pub permission: &'static str,
    pub value: Option<u32>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTable {
    pub id: String,
    pub uri: String,
    pub status: Option<String>,
    pub rows: Vec<RegisterRow>,
}

impl DeviceTable {
    fn build(device: &Device, with_values: bool) -> Self {
        let mut rows = Vec::new();
        push_leaves(&device.root, with_values, &mut rows);
        Self {
            id: device.id.clone(),
            uri: device.uri.clone(),
            status: if with_values {
                device.status.clone()
            } else {
                None
            },
            rows,
        }
    }
}

fn push_leaves(node: &Node, with_values: bool, rows: &mut Vec<RegisterRow>) {
    if node.children.is_empty() {
        if node.path.is_empty() {
            return;
        }
        rows.push(RegisterRow {
            path: node.path.clone(),
            address: node.address,
            mask: node.mask,
            permission: node.permission.as_str(),
            value: if with_values { node.value } else { None },
            description: node.description.clone(),
        });
        return;
    }
    for child in &node.children {
        push_leaves(child, with_values, rows);
    }
}

/// Tableau des registres de chaque périphérique.
///
/// Le panneau ne garde pas le handle matériel : il reconstruit ses lignes à
/// chaque notification.
#[derive(Default)]
pub struct HardwareTablePanel {
    tables: Vec<DeviceTable>,
    populated: bool,
}

impl HardwareTablePanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Structure seule, sans valeurs
    pub fn draw_hw_naked_tables(&mut self, hw: &HardwareStruct) {
        self.tables = hw.devices.iter().map(|d| DeviceTable::build(d, false)).collect();
        self.populated = false;
    }

    pub fn on_hw_ready(&mut self, hw: &HardwareStruct) {
        self.tables = hw.devices.iter().map(|d| DeviceTable::build(d, true)).collect();
        self.populated = true;
    }

    pub fn tables(&self) -> &[DeviceTable] {
        &self.tables
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn ui(&self, ui: &mut egui::Ui) {
        if self.tables.is_empty() {
            ui.centered_and_justified(|ui| {
                ui.label("📁 File → Load HW to open a connection file");
            });
            return;
        }

        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for table in &self.tables {
                    egui::CollapsingHeader::new(format!("{}  ({})", table.id, table.uri))
                        .id_source(&table.id)
                        .default_open(true)
                        .show(ui, |ui| {
                            if let Some(err) = &table.status {
                                ui.colored_label(egui::Color32::from_rgb(200, 0, 0), format!("❌ {}", err));
                            }
                            Self::grid(ui, table);
                        });
                }
            });
    }

    fn grid(ui: &mut egui::Ui, table: &DeviceTable) {
        egui::Grid::new(("registers", &table.id))
            .striped(true)
            .num_columns(5)
            .show(ui, |ui| {
                ui.strong("Register");
                ui.strong("Address");
                ui.strong("Mask");
                ui.strong("Perm");
                ui.strong("Value");
                ui.end_row();

                for row in &table.rows {
                    let name = ui.monospace(&row.path);
                    if !row.description.is_empty() {
                        name.on_hover_text(&row.description);
                    }
                    ui.monospace(format!("0x{:08x}", row.address));
                    ui.monospace(format!("0x{:08x}", row.mask));
                    ui.label(row.permission);
                    ui.monospace(format_value(row.value));
                    ui.end_row();
                }
            });
    }
}
