// Paramètres
pub const APP_NAME: &str = "Register Map Viewer";
pub const WINDOW_SIZE: [f32; 2] = [800.0, 600.0];
pub const MIN_WINDOW_SIZE: [f32; 2] = [800.0, 600.0];
pub const TREE_WINDOW_SIZE: [f32; 2] = [320.0, 480.0];

pub const DOC_URL: &str = "https://ipbus.web.cern.ch/doc/user/html/";
pub const SUPPORT_URL: &str = "https://github.com/ipbus/ipbus-software/issues";

pub const DEFAULT_PERIOD_MS: u64 = 1000;
pub const MIN_PERIOD_MS: u64 = 50;
// Images en attente entre les workers et la fenêtre
pub const READY_QUEUE_DEPTH: usize = 2;

pub const IPBUS_VERSION: u32 = 2;
pub const IPBUS_TIMEOUT_MS: u64 = 1000;
pub const MAX_READS_PER_PACKET: usize = 64;
pub const MAX_UDP_PACKET: usize = 1500;
