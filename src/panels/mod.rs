pub mod hardware_table;
pub mod hardware_tree;
pub mod refresh_buttons;

pub use hardware_table::HardwareTablePanel;
pub use hardware_tree::HardwareTree;
pub use refresh_buttons::{ControlRequest, RefreshButtonsPanel};

/// Valeur d'un registre telle qu'affichée ("-" tant qu'elle n'a pas été lue)
pub fn format_value(value: Option<u32>) -> String {
    match value {
        Some(v) => format!("0x{:08x}", v),
        None => "-".to_string(),
    }
}
