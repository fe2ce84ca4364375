//! Best-effort, bounded-time device enrichment.
//!
//! Reverse name resolution and OUI vendor lookup both run once per unique
//! address after initial discovery and never block the scan of subsequent
//! subnets.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;
use std::time::Duration;

use mac_oui::Oui;

/// Global OUI database, loaded on first use.
static OUI_DB: OnceLock<Option<Oui>> = OnceLock::new();

fn oui_db() -> Option<&'static Oui> {
    OUI_DB.get_or_init(|| Oui::default().ok()).as_ref()
}

/// Whether the MAC is locally administered (randomized or virtual); those
/// carry no meaningful OUI prefix.
fn is_locally_administered(mac: &str) -> bool {
    let first: String = mac
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(2)
        .collect();
    if first.len() < 2 {
        return false;
    }
    u8::from_str_radix(&first, 16).map_or(false, |b| b & 0x02 != 0)
}

/// Vendor name for a hardware address, from the OUI prefix.
pub fn vendor_for_mac(mac: &str) -> Option<String> {
    if is_locally_administered(mac) {
        return None;
    }
    let db = oui_db()?;
    match db.lookup_by_mac(mac) {
        Ok(Some(entry)) => Some(entry.company_name.clone()),
        _ => None,
    }
}

/// Reverse-resolve an address, bounded by `timeout`.
///
/// The blocking resolver call runs on the blocking pool; a timeout or a
/// PTR record that just echoes the address both yield `None`.
pub async fn reverse_lookup(addr: Ipv4Addr, timeout: Duration) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || {
        dns_lookup::lookup_addr(&IpAddr::V4(addr)).ok()
    });
    let name = tokio::time::timeout(timeout, lookup).await.ok()?.ok()??;
    if name == addr.to_string() || name.is_empty() {
        return None;
    }
    Some(name)
}
