//! Scan backend selection.
//!
//! The worker scans through the `ScanBackend` seam: nmap when installed,
//! otherwise the unprivileged ping+ARP sweep. Availability is probed once
//! per job; a host with neither tool fails the job outright, because zero
//! results would be indistinguishable from "no devices found".

use std::future::Future;
use std::sync::Arc;

use ipnet::Ipv4Net;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lanbeat_core::types::ScanProfile;

use crate::config::DiscoverConfig;
use crate::error::{DiscoverError, Result};
use crate::results::Sighting;
use crate::scanner::NmapScanner;
use crate::sweep::{PingSweep, SweepOutcome};

/// Outcome of scanning one subnet.
#[derive(Debug, PartialEq, Eq)]
pub enum ScanUnitOutcome {
    Scanned,
    /// The unit was not attempted; recorded as a warning, not a failure.
    Skipped { reason: String },
}

/// One-shot, per-subnet scan operation.
pub trait ScanBackend: Clone + Send + Sync + 'static {
    /// Job-fatal availability check, run once before any subnet is scanned.
    fn prepare(&self) -> impl Future<Output = Result<()>> + Send;

    /// Scan one subnet, emitting sightings through `tx` as they are found.
    fn scan(
        &self,
        subnet: Ipv4Net,
        profile: ScanProfile,
        cancel: CancellationToken,
        tx: mpsc::Sender<Sighting>,
    ) -> impl Future<Output = Result<ScanUnitOutcome>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Nmap,
    Sweep,
}

/// Production backend: nmap preferred, ping sweep as fallback.
#[derive(Clone)]
pub struct HostDiscovery {
    nmap: NmapScanner,
    sweep: PingSweep,
    mode: Arc<std::sync::OnceLock<Mode>>,
}

impl HostDiscovery {
    pub fn new(config: &DiscoverConfig) -> Self {
        Self {
            nmap: NmapScanner::new(&config.nmap_path),
            sweep: PingSweep::new(&config.ping_path, config.sweep_host_ceiling),
            mode: Arc::new(std::sync::OnceLock::new()),
        }
    }
}

impl ScanBackend for HostDiscovery {
    fn prepare(&self) -> impl Future<Output = Result<()>> + Send {
        async move {
            match self.nmap.verify_installation().await {
                Ok(version) => {
                    tracing::info!(
                        nmap_version = %version.lines().next().unwrap_or_default(),
                        "Using nmap for host discovery"
                    );
                    let _ = self.mode.set(Mode::Nmap);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "nmap unavailable, trying ping fallback");
                }
            }

            match self.sweep.verify_installation().await {
                Ok(()) => {
                    tracing::info!("Using ping sweep fallback for host discovery");
                    let _ = self.mode.set(Mode::Sweep);
                    Ok(())
                }
                Err(_) => Err(DiscoverError::ToolUnavailable(
                    "neither nmap nor ping is available".to_string(),
                )),
            }
        }
    }

    fn scan(
        &self,
        subnet: Ipv4Net,
        profile: ScanProfile,
        cancel: CancellationToken,
        tx: mpsc::Sender<Sighting>,
    ) -> impl Future<Output = Result<ScanUnitOutcome>> + Send {
        let backend = self.clone();
        async move {
            match backend.mode.get().copied().unwrap_or(Mode::Sweep) {
                Mode::Nmap => {
                    backend.nmap.scan(subnet, profile, &cancel, &tx).await?;
                    Ok(ScanUnitOutcome::Scanned)
                }
                Mode::Sweep => {
                    match backend.sweep.scan(subnet, profile, &cancel, &tx).await? {
                        SweepOutcome::Completed => Ok(ScanUnitOutcome::Scanned),
                        SweepOutcome::TooLarge { host_count } => Ok(ScanUnitOutcome::Skipped {
                            reason: format!(
                                "subnet {subnet} has {host_count} hosts, over the sweep ceiling"
                            ),
                        }),
                    }
                }
            }
        }
    }
}
