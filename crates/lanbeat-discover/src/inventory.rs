//! Read-only seam to the monitoring inventory.
//!
//! The inventory itself (add/edit/remove targets) lives elsewhere in the
//! product; discovery only needs a snapshot of the known addresses, taken
//! once at job start.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Result;

pub trait InventorySource: Send + Sync {
    /// Addresses currently present in the monitoring inventory.
    fn snapshot(&self) -> Result<HashSet<Ipv4Addr>>;
}

/// Inventory backed by the monitor's JSON target file.
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct TargetEntry {
    ip: Ipv4Addr,
}

impl FileInventory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl InventorySource for FileInventory {
    fn snapshot(&self) -> Result<HashSet<Ipv4Addr>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(HashSet::new());
            }
            Err(e) => return Err(e.into()),
        };
        let targets: Vec<TargetEntry> = serde_json::from_str(&raw)?;
        Ok(targets.into_iter().map(|t| t.ip).collect())
    }
}

/// Empty inventory, used when no target file is configured.
#[derive(Debug, Clone, Default)]
pub struct NullInventory;

impl InventorySource for NullInventory {
    fn snapshot(&self) -> Result<HashSet<Ipv4Addr>> {
        Ok(HashSet::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_inventory_reads_target_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            br#"[{"name":"nas","ip":"192.168.1.50","interval":60},{"name":"ap","ip":"192.168.1.2","interval":30}]"#,
        )
        .unwrap();

        let snapshot = FileInventory::new(path).snapshot().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&"192.168.1.50".parse().unwrap()));
    }

    #[test]
    fn missing_file_is_an_empty_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = FileInventory::new(dir.path().join("absent.json"))
            .snapshot()
            .unwrap();
        assert!(snapshot.is_empty());
    }
}
