// src/hardware.rs

use crate::error::{HwError, Result};

use std::fs;
use std::path::{Path, PathBuf};

/// Droits d'accès d'un noeud de la table d'adresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
    ReadWrite,
}

impl Permission {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "r" | "read" => Some(Permission::Read),
            "w" | "write" => Some(Permission::Write),
            "rw" | "wr" | "readwrite" | "read_write" => Some(Permission::ReadWrite),
            _ => None,
        }
    }

    pub fn readable(self) -> bool {
        matches!(self, Permission::Read | Permission::ReadWrite)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "r",
            Permission::Write => "w",
            Permission::ReadWrite => "rw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Single,
    Block,
    Port,
}

impl Mode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Some(Mode::Single),
            "block" | "incremental" | "inc" => Some(Mode::Block),
            "port" | "non-incremental" | "nonincremental" | "non-inc" => Some(Mode::Port),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    /// Chemin complet depuis la racine du périphérique ("" pour la racine)
    pub path: String,
    /// Adresse absolue
    pub address: u32,
    pub mask: u32,
    pub permission: Permission,
    pub mode: Mode,
    pub size: u32,
    pub description: String,
    pub value: Option<u32>,
    pub children: Vec<Node>,
}

impl Node {
    /// Registre simple lisible, sans enfants : le seul type interrogé par le monitoring
    pub fn is_pollable(&self) -> bool {
        self.children.is_empty() && self.mode == Mode::Single && self.permission.readable()
    }

    pub fn apply_mask(&self, raw: u32) -> u32 {
        if self.mask == 0 {
            return 0;
        }
        (raw & self.mask) >> self.mask.trailing_zeros()
    }

    pub fn registers(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        collect(self, &mut out);
        out
    }

    pub fn registers_mut(&mut self) -> Vec<&mut Node> {
        let mut out = Vec::new();
        collect_mut(self, &mut out);
        out
    }

    pub fn find(&self, path: &str) -> Option<&Node> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(path))
    }

    #[cfg(test)]
    pub fn find_mut(&mut self, path: &str) -> Option<&mut Node> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(path))
    }
}

fn collect<'a>(node: &'a Node, out: &mut Vec<&'a Node>) {
    if node.is_pollable() {
        out.push(node);
        return;
    }
    for child in &node.children {
        collect(child, out);
    }
}

fn collect_mut<'a>(node: &'a mut Node, out: &mut Vec<&'a mut Node>) {
    if node.is_pollable() {
        out.push(node);
        return;
    }
    for child in node.children.iter_mut() {
        collect_mut(child, out);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub uri: String,
    pub root: Node,
    /// Dernière erreur de lecture, None si tout va bien
    pub status: Option<String>,
}

/// Description complète du matériel chargée depuis un fichier de connexion.
///
/// C'est le "handle" matériel de la fenêtre principale : il est remplacé en
/// bloc à chaque chargement et chaque worker de monitoring en possède sa
/// propre copie.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareStruct {
    pub source: PathBuf,
    pub devices: Vec<Device>,
}

impl HardwareStruct {
    pub fn from_connection_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = read_file(path)?;
        let doc = roxmltree::Document::parse(&text).map_err(|source| HwError::Xml {
            path: path.to_path_buf(),
            source,
        })?;

        let root = doc.root_element();
        if !root.has_tag_name("connections") {
            return Err(HwError::description(
                path,
                format!("expected <connections>, found <{}>", root.tag_name().name()),
            ));
        }

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut devices = Vec::new();

        for conn in root
            .children()
            .filter(|n| n.is_element() && n.has_tag_name("connection"))
        {
            let id = required_attr(path, conn, "id")?;
            let uri = required_attr(path, conn, "uri")?;
            let table = required_attr(path, conn, "address_table")?;
            let table_path = resolve(base_dir, table);

            let mut stack = Vec::new();
            let tree = load_address_table(&table_path, 0, "", &mut stack)?;

            devices.push(Device {
                id: id.to_string(),
                uri: uri.to_string(),
                root: tree,
                status: None,
            });
        }

        if devices.is_empty() {
            return Err(HwError::description(path, "no <connection> entries"));
        }

        log::info!(
            "Chargé {} périphérique(s) depuis {}",
            devices.len(),
            path.display()
        );

        Ok(Self {
            source: path.to_path_buf(),
            devices,
        })
    }

    #[cfg(test)]
    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn register_count(&self) -> usize {
        self.devices.iter().map(|d| d.root.registers().len()).sum()
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| HwError::File {
        path: path.to_path_buf(),
        source,
    })
}

/// "file://x.xml" ou "x.xml", relatif au fichier qui le référence
fn resolve(base_dir: &Path, reference: &str) -> PathBuf {
    let stripped = reference.strip_prefix("file://").unwrap_or(reference);
    let p = Path::new(stripped);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn required_attr<'a>(path: &Path, node: roxmltree::Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        HwError::description(
            path,
            format!(
                "<{}> at byte {} is missing attribute '{}'",
                node.tag_name().name(),
                node.range().start,
                name
            ),
        )
    })
}

pub fn parse_u32(s: &str) -> Option<u32> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn number_attr(path: &Path, node: roxmltree::Node, name: &str, default: u32) -> Result<u32> {
    match node.attribute(name) {
        None => Ok(default),
        Some(raw) => parse_u32(raw).ok_or_else(|| {
            HwError::description(path, format!("bad value '{}' for attribute '{}'", raw, name))
        }),
    }
}

fn load_address_table(
    path: &Path,
    base_address: u32,
    base_path: &str,
    stack: &mut Vec<PathBuf>,
) -> Result<Node> {
    let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if stack.contains(&key) {
        return Err(HwError::description(path, "address table includes itself"));
    }
    stack.push(key);

    let text = read_file(path)?;
    let doc = roxmltree::Document::parse(&text).map_err(|source| HwError::Xml {
        path: path.to_path_buf(),
        source,
    })?;

    let root = doc.root_element();
    if !root.has_tag_name("node") {
        return Err(HwError::description(
            path,
            format!("expected <node>, found <{}>", root.tag_name().name()),
        ));
    }

    let node = parse_node(path, root, base_address, base_path, true, stack)?;
    stack.pop();
    Ok(node)
}

fn parse_node(
    path: &Path,
    elem: roxmltree::Node,
    parent_address: u32,
    parent_path: &str,
    is_root: bool,
    stack: &mut Vec<PathBuf>,
) -> Result<Node> {
    let id = if is_root {
        elem.attribute("id").unwrap_or("TOP").to_string()
    } else {
        required_attr(path, elem, "id")?.to_string()
    };

    // La racine d'une table ne contribue pas au chemin
    let node_path = if is_root {
        parent_path.to_string()
    } else if parent_path.is_empty() {
        id.clone()
    } else {
        format!("{}.{}", parent_path, id)
    };

    let offset = number_attr(path, elem, "address", 0)?;
    let address = parent_address.wrapping_add(offset);
    let mask = number_attr(path, elem, "mask", 0xFFFF_FFFF)?;
    let size = number_attr(path, elem, "size", 1)?;

    let permission = match elem.attribute("permission") {
        None => Permission::ReadWrite,
        Some(p) => Permission::parse(p).ok_or_else(|| {
            HwError::description(path, format!("unknown permission '{}' on '{}'", p, id))
        })?,
    };
    let mode = match elem.attribute("mode") {
        None => Mode::Single,
        Some(m) => Mode::parse(m).ok_or_else(|| {
            HwError::description(path, format!("unknown mode '{}' on '{}'", m, id))
        })?,
    };

    let children = match elem.attribute("module") {
        Some(module) => {
            let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
            let included = load_address_table(&resolve(base_dir, module), address, &node_path, stack)?;
            included.children
        }
        None => elem
            .children()
            .filter(|c| c.is_element() && c.has_tag_name("node"))
            .map(|c| parse_node(path, c, address, &node_path, false, stack))
            .collect::<Result<Vec<_>>>()?,
    };

    Ok(Node {
        id,
        path: node_path,
        address,
        mask,
        permission,
        mode,
        size,
        description: elem.attribute("description").unwrap_or_default().to_string(),
        value: None,
        children,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) const TABLE: &str = r#"<node id="TOP">
  <node id="CSR" address="0x0">
    <node id="ctrl" address="0x0" permission="rw"/>
    <node id="stat" address="0x1" mask="0x0000ff00" permission="r"/>
  </node>
  <node id="cmd" address="0x10" permission="w"/>
  <node id="buf" address="0x20" mode="block" size="16" permission="r"/>
  <node id="SUB" address="0x100" module="file://sub.xml"/>
</node>"#;

    pub(crate) const SUB: &str = r#"<node>
  <node id="id" address="0x2" permission="r" description="board id"/>
</node>"#;

    pub(crate) fn connections(uri: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<connections>
  <connection id="board" uri="{}" address_table="file://top.xml"/>
</connections>"#,
            uri
        )
    }

    pub(crate) fn fixture(uri: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("top.xml"), TABLE).unwrap();
        fs::write(dir.path().join("sub.xml"), SUB).unwrap();
        let conn = dir.path().join("device.xml");
        fs::write(&conn, connections(uri)).unwrap();
        (dir, conn)
    }

    #[test]
    fn loads_devices_and_nested_modules() {
        let (_dir, conn) = fixture("ipbusudp-2.0://127.0.0.1:50001");
        let hw = HardwareStruct::from_connection_file(&conn).unwrap();

        assert_eq!(hw.devices.len(), 1);
        let dev = hw.device("board").unwrap();
        assert_eq!(dev.uri, "ipbusudp-2.0://127.0.0.1:50001");

        let id = dev.root.find("SUB.id").unwrap();
        assert_eq!(id.address, 0x102);
        assert_eq!(id.description, "board id");

        let stat = dev.root.find("CSR.stat").unwrap();
        assert_eq!(stat.address, 0x1);
        assert_eq!(stat.mask, 0xff00);
        assert!(stat.value.is_none());
    }

    #[test]
    fn only_single_readable_leaves_are_polled() {
        let (_dir, conn) = fixture("ipbusudp-2.0://127.0.0.1:50001");
        let hw = HardwareStruct::from_connection_file(&conn).unwrap();

        let paths: Vec<_> = hw.devices[0]
            .root
            .registers()
            .into_iter()
            .map(|n| n.path.as_str())
            .collect();
        assert_eq!(paths, vec!["CSR.ctrl", "CSR.stat", "SUB.id"]);
        assert_eq!(hw.register_count(), 3);
    }

    #[test]
    fn mask_shifts_field_down() {
        let (_dir, conn) = fixture("ipbusudp-2.0://127.0.0.1:50001");
        let hw = HardwareStruct::from_connection_file(&conn).unwrap();
        let stat = hw.devices[0].root.find("CSR.stat").unwrap();
        assert_eq!(stat.apply_mask(0x1234_5678), 0x56);
    }

    #[test]
    fn parse_u32_accepts_hex_and_decimal() {
        assert_eq!(parse_u32("0x10"), Some(16));
        assert_eq!(parse_u32(" 42 "), Some(42));
        assert_eq!(parse_u32("0XfF"), Some(255));
        assert_eq!(parse_u32("nope"), None);
    }

    #[test]
    fn missing_node_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("top.xml"), r#"<node><node address="1"/></node>"#).unwrap();
        let conn = dir.path().join("c.xml");
        fs::write(&conn, connections("ipbusudp-2.0://h:1")).unwrap();

        let err = HardwareStruct::from_connection_file(&conn).unwrap_err();
        assert!(err.to_string().contains("missing attribute 'id'"), "{}", err);
    }

    #[test]
    fn self_including_module_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("top.xml"),
            r#"<node><node id="loop" module="file://top.xml"/></node>"#,
        )
        .unwrap();
        let conn = dir.path().join("c.xml");
        fs::write(&conn, connections("ipbusudp-2.0://h:1")).unwrap();

        let err = HardwareStruct::from_connection_file(&conn).unwrap_err();
        assert!(err.to_string().contains("includes itself"), "{}", err);
    }

    #[test]
    fn malformed_or_empty_connection_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.xml");
        fs::write(&bad, "<connections>").unwrap();
        assert!(matches!(
            HardwareStruct::from_connection_file(&bad),
            Err(HwError::Xml { .. })
        ));

        let empty = dir.path().join("empty.xml");
        fs::write(&empty, "<connections/>").unwrap();
        assert!(HardwareStruct::from_connection_file(&empty).is_err());

        assert!(matches!(
            HardwareStruct::from_connection_file(dir.path().join("absent.xml")),
            Err(HwError::File { .. })
        ));
    }
}
