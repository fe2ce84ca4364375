//! Device result model: deduplicates raw sightings into one Device per
//! address.
//!
//! The result set is a derived projection of the event log: first sighting
//! of an address creates the Device, later sightings only fill blanks.

use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;

use lanbeat_core::types::Device;

/// One raw observation of a host, as emitted by a scan backend or an
/// enrichment pass. Several sightings of the same address are expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub address: Ipv4Addr,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub vendor: Option<String>,
}

impl Sighting {
    pub fn new(address: Ipv4Addr) -> Self {
        Self {
            address,
            hostname: None,
            mac: None,
            vendor: None,
        }
    }
}

/// Deduplicated device map for one job, keyed by address.
#[derive(Debug, Default)]
pub struct ResultSet {
    devices: BTreeMap<Ipv4Addr, Device>,
    /// Snapshot of the monitoring inventory taken at job start. Computed
    /// once so mid-scan inventory edits cannot retroactively change
    /// already-emitted events.
    known: HashSet<Ipv4Addr>,
}

impl ResultSet {
    pub fn new(known: HashSet<Ipv4Addr>) -> Self {
        Self {
            devices: BTreeMap::new(),
            known,
        }
    }

    /// Merge a sighting and return the up-to-date record for its address.
    pub fn absorb(&mut self, sighting: &Sighting) -> Device {
        let incoming = Device {
            address: sighting.address,
            display_name: sighting.hostname.clone(),
            hardware_address: sighting.mac.clone(),
            vendor: sighting.vendor.clone(),
            already_known: self.known.contains(&sighting.address),
        };

        let entry = self
            .devices
            .entry(sighting.address)
            .or_insert_with(|| incoming.clone());
        entry.merge(&incoming);
        entry.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, address: &Ipv4Addr) -> Option<&Device> {
        self.devices.get(address)
    }

    /// The inventory snapshot this set was created with.
    pub fn known_addresses(&self) -> Vec<Ipv4Addr> {
        self.known.iter().copied().collect()
    }

    pub fn into_devices(self) -> BTreeMap<Ipv4Addr, Device> {
        self.devices
    }

    pub fn devices(&self) -> &BTreeMap<Ipv4Addr, Device> {
        &self.devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn same_address_twice_yields_one_device() {
        let mut set = ResultSet::new(HashSet::new());
        set.absorb(&Sighting::new(addr("10.0.0.5")));
        set.absorb(&Sighting::new(addr("10.0.0.5")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn later_empty_fields_never_clobber() {
        let mut set = ResultSet::new(HashSet::new());
        set.absorb(&Sighting {
            hostname: Some("nas.lan".to_string()),
            mac: Some("aa:bb:cc:00:11:22".to_string()),
            ..Sighting::new(addr("10.0.0.5"))
        });
        let merged = set.absorb(&Sighting::new(addr("10.0.0.5")));
        assert_eq!(merged.display_name.as_deref(), Some("nas.lan"));
        assert_eq!(merged.hardware_address.as_deref(), Some("aa:bb:cc:00:11:22"));
    }

    #[test]
    fn enrichment_fills_blanks_non_destructively() {
        let mut set = ResultSet::new(HashSet::new());
        set.absorb(&Sighting::new(addr("10.0.0.5")));
        let enriched = set.absorb(&Sighting {
            vendor: Some("Acme".to_string()),
            ..Sighting::new(addr("10.0.0.5"))
        });
        assert_eq!(enriched.address, addr("10.0.0.5"));
        assert_eq!(enriched.vendor.as_deref(), Some("Acme"));
    }

    #[test]
    fn already_known_is_fixed_at_creation() {
        let known: HashSet<Ipv4Addr> = [addr("192.168.1.50")].into_iter().collect();
        let mut set = ResultSet::new(known);
        let hit = set.absorb(&Sighting::new(addr("192.168.1.50")));
        let miss = set.absorb(&Sighting::new(addr("192.168.1.51")));
        assert!(hit.already_known);
        assert!(!miss.already_known);
    }
}
