//! lanbeat-discover: LAN device discovery for the lanbeat monitor.
//!
//! Plans RFC1918 subnets from the local network context, scans them with
//! nmap (or an unprivileged ping+ARP sweep when nmap is missing), and
//! publishes progress through a durable job record and an append-only,
//! resumable event log.

pub mod config;
pub mod enrich;
pub mod error;
pub mod eventlog;
pub mod executor;
pub mod inventory;
pub mod job;
pub mod netinfo;
pub mod nmap_output;
pub mod plan;
pub mod results;
pub mod scanner;
pub mod sweep;
pub mod worker;
