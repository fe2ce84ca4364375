//! Core domain types for the lanbeat discovery engine.
//!
//! These types are shared between the discovery worker, the orchestrator,
//! and the product surfaces that read job state (CLI, web UI).

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// ── Job identity ──────────────────────────────────────────────────

/// Unique identifier for one discovery job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Scan options ──────────────────────────────────────────────────

/// What part of the address space a job should probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum ScanScope {
    /// Infer subnets from the gateway, local interfaces, and known targets.
    Auto,
    /// Enumerate one RFC1918 series ("10", "172", "192") or "all" of them.
    Series { series: String },
    /// Operator-supplied CIDR literals only.
    Custom,
}

impl FromStr for ScanScope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "custom" => Ok(Self::Custom),
            "10" | "172" | "192" | "all" => Ok(Self::Series {
                series: s.to_lowercase(),
            }),
            other => Err(CoreError::InvalidScope(other.to_string())),
        }
    }
}

/// Timing/retry aggressiveness for probes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanProfile {
    /// Conservative timing with inter-probe delay.
    Safe,
    #[default]
    Normal,
    /// Aggressive timing, short per-host timeout.
    Fast,
}

impl FromStr for ScanProfile {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "normal" => Ok(Self::Normal),
            "fast" => Ok(Self::Fast),
            other => Err(CoreError::InvalidScope(other.to_string())),
        }
    }
}

/// Immutable per-job configuration, created once when a job starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanOptions {
    #[serde(flatten)]
    pub scope: ScanScope,
    /// CIDR literals, used when scope is `Custom`.
    #[serde(default)]
    pub custom_ranges: Vec<String>,
    /// Restrict auto planning to one local interface.
    #[serde(default)]
    pub interface_hint: Option<String>,
    #[serde(default)]
    pub profile: ScanProfile,
    /// Safety cap on the number of subnets probed.
    #[serde(default = "default_subnet_cap")]
    pub subnet_cap: usize,
}

fn default_subnet_cap() -> usize {
    4096
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            scope: ScanScope::Auto,
            custom_ranges: Vec::new(),
            interface_hint: None,
            profile: ScanProfile::default(),
            subnet_cap: default_subnet_cap(),
        }
    }
}

// ── Job state ─────────────────────────────────────────────────────

/// Lifecycle state of a discovery job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Running,
    Cancelling,
    Cancelled,
    Done,
    Error,
}

impl JobStatus {
    /// A job in an active state excludes starting another one.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Cancelling)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Done | Self::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Subnet-level progress counters for UI display.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    /// Index of the subnet currently being probed (1-based once running).
    pub current: u32,
    /// Total planned subnets.
    pub total: u32,
    /// CIDR of the subnet currently being probed.
    #[serde(default)]
    pub current_subnet: Option<String>,
}

// ── Devices ───────────────────────────────────────────────────────

/// One discovered host, keyed by its IPv4 address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub address: Ipv4Addr,
    /// From reverse resolution, when available.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Link-layer (MAC) address, observable on the local segment.
    #[serde(default)]
    pub hardware_address: Option<String>,
    /// Derived from the hardware address OUI prefix.
    #[serde(default)]
    pub vendor: Option<String>,
    /// Whether the address was already in the monitoring inventory when
    /// the device was first seen in this job.
    #[serde(default)]
    pub already_known: bool,
}

impl Device {
    pub fn new(address: Ipv4Addr) -> Self {
        Self {
            address,
            display_name: None,
            hardware_address: None,
            vendor: None,
            already_known: false,
        }
    }

    /// Fold a later sighting of the same address into this record.
    ///
    /// Only previously-empty fields are filled; a populated field is never
    /// overwritten by a later empty value. `already_known` is fixed at
    /// creation time and never updated here.
    pub fn merge(&mut self, other: &Device) {
        if self.display_name.is_none() {
            self.display_name = other.display_name.clone();
        }
        if self.hardware_address.is_none() {
            self.hardware_address = other.hardware_address.clone();
        }
        if self.vendor.is_none() {
            self.vendor = other.vendor.clone();
        }
    }
}

// ── Persisted job record ──────────────────────────────────────────

/// The durable job metadata record, overwritten per job.
///
/// This record plus the event log is the entire contract between the
/// orchestrator and the worker; a freshly started process can answer
/// status/result from it alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub options: ScanOptions,
    #[serde(default)]
    pub planned_subnets: Vec<String>,
    #[serde(default)]
    pub progress: Progress,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Touched by the worker at every checkpoint; the orchestrator treats a
    /// stale heartbeat as a dead worker.
    pub heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub devices: BTreeMap<Ipv4Addr, Device>,
}

impl JobRecord {
    pub fn new(options: ScanOptions) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Starting,
            options,
            planned_subnets: Vec::new(),
            progress: Progress::default(),
            started_at: now,
            finished_at: None,
            heartbeat: now,
            error: None,
            devices: BTreeMap::new(),
        }
    }

    pub fn touch_heartbeat(&mut self) {
        self.heartbeat = Utc::now();
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            started_at: self.started_at,
            planned_subnets: self.planned_subnets.len(),
        }
    }
}

/// Compact job identity returned by start().
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub planned_subnets: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parses_from_cli_strings() {
        assert_eq!("auto".parse::<ScanScope>().unwrap(), ScanScope::Auto);
        assert_eq!("custom".parse::<ScanScope>().unwrap(), ScanScope::Custom);
        assert_eq!(
            "192".parse::<ScanScope>().unwrap(),
            ScanScope::Series {
                series: "192".to_string()
            }
        );
        assert!("11".parse::<ScanScope>().is_err());
    }

    #[test]
    fn status_classification() {
        assert!(JobStatus::Running.is_active());
        assert!(JobStatus::Cancelling.is_active());
        assert!(!JobStatus::Done.is_active());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Starting.is_terminal());
    }

    #[test]
    fn device_merge_never_clobbers() {
        let addr: Ipv4Addr = "10.0.0.5".parse().unwrap();
        let mut first = Device {
            display_name: Some("printer.lan".to_string()),
            ..Device::new(addr)
        };
        let later = Device {
            display_name: None,
            vendor: Some("Acme".to_string()),
            ..Device::new(addr)
        };

        first.merge(&later);
        assert_eq!(first.display_name.as_deref(), Some("printer.lan"));
        assert_eq!(first.vendor.as_deref(), Some("Acme"));
    }

    #[test]
    fn record_roundtrips_through_json() {
        let mut record = JobRecord::new(ScanOptions::default());
        record
            .devices
            .insert("192.168.1.7".parse().unwrap(), Device::new("192.168.1.7".parse().unwrap()));

        let json = serde_json::to_string(&record).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.devices.len(), 1);
    }

    #[test]
    fn options_serialize_with_flat_scope() {
        let options = ScanOptions {
            scope: ScanScope::Series {
                series: "10".to_string(),
            },
            ..ScanOptions::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("\"scope\":\"series\""));
        assert!(json.contains("\"series\":\"10\""));
    }
}
