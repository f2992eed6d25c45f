// src/panels/hardware_tree.rs

use super::format_value;
use crate::config::TREE_WINDOW_SIZE;
use crate::hardware::{HardwareStruct, Node};

use eframe::egui;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeItem {
    pub label: String,
    pub id: String,
    pub address: u32,
    pub value: Option<u32>,
    pub children: Vec<TreeItem>,
}

impl TreeItem {
    fn from_node(node: &Node, id: String, label: String) -> Self {
        Self {
            children: node
                .children
                .iter()
                .map(|c| TreeItem::from_node(c, format!("{}.{}", id, c.id), c.id.clone()))
                .collect(),
            label,
            id,
            address: node.address,
            value: node.value,
        }
    }
}

/// Fenêtre secondaire : arborescence des périphériques et de leurs registres
pub struct HardwareTree {
    title: String,
    open: bool,
    roots: Vec<TreeItem>,
}

impl HardwareTree {
    pub fn new(hw: &HardwareStruct) -> Self {
        let mut tree = Self {
            title: format!("Hardware tree: {}", file_name(hw)),
            open: false,
            roots: Vec::new(),
        };
        tree.redraw(hw);
        tree
    }

    pub fn show(&mut self) {
        self.open = true;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn redraw(&mut self, hw: &HardwareStruct) {
        self.roots = hw
            .devices
            .iter()
            .map(|d| TreeItem::from_node(&d.root, d.id.clone(), d.id.clone()))
            .collect();
    }

    pub fn roots(&self) -> &[TreeItem] {
        &self.roots
    }

    pub fn ui(&mut self, ctx: &egui::Context) {
        let roots = &self.roots;
        egui::Window::new(&self.title)
            .open(&mut self.open)
            .default_size(TREE_WINDOW_SIZE)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    for item in roots {
                        Self::item_ui(ui, item, 0);
                    }
                });
            });
    }

    fn item_ui(ui: &mut egui::Ui, item: &TreeItem, depth: usize) {
        if item.children.is_empty() {
            ui.horizontal(|ui| {
                ui.monospace(&item.label);
                ui.weak(format!("@0x{:08x}", item.address));
                ui.monospace(format_value(item.value));
            });
            return;
        }

        egui::CollapsingHeader::new(&item.label)
            .id_source(&item.id)
            .default_open(depth == 0)
            .show(ui, |ui| {
                for child in &item.children {
                    Self::item_ui(ui, child, depth + 1);
                }
            });
    }
}

fn file_name(hw: &HardwareStruct) -> String {
    hw.source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| hw.source.display().to_string())
}
