//! Fallback host discovery: ICMP ping sweep plus a neighbor-table read.
//!
//! Used when nmap is not installed. Probes every host address in a subnet
//! with the system `ping` under a bounded worker pool, then reads the
//! kernel neighbor table to recover link-layer addresses for responders.
//! Runs unprivileged.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use ipnet::Ipv4Net;
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use lanbeat_core::types::ScanProfile;

use crate::config::SweepTuning;
use crate::error::{DiscoverError, Result};
use crate::results::Sighting;

/// Outcome of one fallback subnet sweep.
#[derive(Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed,
    /// The subnet's host count exceeds the safety ceiling; nothing probed.
    TooLarge { host_count: usize },
}

#[derive(Debug, Clone)]
pub struct PingSweep {
    ping_path: String,
    host_ceiling: usize,
}

impl PingSweep {
    pub fn new(ping_path: &str, host_ceiling: usize) -> Self {
        Self {
            ping_path: ping_path.to_string(),
            host_ceiling,
        }
    }

    /// Check that the ping binary can be spawned at all.
    pub async fn verify_installation(&self) -> Result<()> {
        Command::new(&self.ping_path)
            .arg("-V")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                DiscoverError::ToolUnavailable(format!("{}: {e}", self.ping_path))
            })?;
        Ok(())
    }

    /// Sweep one subnet.
    ///
    /// Responders are sent through `tx` as their probe completes; once the
    /// sweep finishes, responders found in the neighbor table are re-sent
    /// with their hardware address (the result model merges the two).
    pub async fn scan(
        &self,
        subnet: Ipv4Net,
        profile: ScanProfile,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<Sighting>,
    ) -> Result<SweepOutcome> {
        let hosts: Vec<Ipv4Addr> = subnet.hosts().collect();
        if hosts.len() > self.host_ceiling {
            tracing::warn!(
                cidr = %subnet,
                host_count = hosts.len(),
                ceiling = self.host_ceiling,
                "Subnet too large for fallback sweep, skipping"
            );
            return Ok(SweepOutcome::TooLarge {
                host_count: hosts.len(),
            });
        }

        let tuning = SweepTuning::for_profile(profile);
        tracing::info!(
            cidr = %subnet,
            host_count = hosts.len(),
            concurrency = tuning.concurrency,
            "Starting fallback ping sweep"
        );

        let sem = Arc::new(Semaphore::new(tuning.concurrency));
        let mut set: JoinSet<Option<Ipv4Addr>> = JoinSet::new();
        let mut responders: Vec<Ipv4Addr> = Vec::new();

        for addr in hosts {
            // Stop dispatching as soon as cancellation is observed; probes
            // already in flight bound themselves by their own timeout.
            if cancel.is_cancelled() {
                break;
            }
            let permit = match sem.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let ping_path = self.ping_path.clone();
            let timeout = tuning.probe_timeout;
            set.spawn(async move {
                let _permit = permit;
                if probe(&ping_path, addr, timeout).await {
                    Some(addr)
                } else {
                    None
                }
            });

            while let Some(done) = set.try_join_next() {
                if let Ok(Some(up)) = done {
                    responders.push(up);
                    if tx.send(Sighting::new(up)).await.is_err() {
                        return Ok(SweepOutcome::Completed);
                    }
                }
            }
        }

        while let Some(done) = set.join_next().await {
            if let Ok(Some(up)) = done {
                responders.push(up);
                if tx.send(Sighting::new(up)).await.is_err() {
                    return Ok(SweepOutcome::Completed);
                }
            }
        }

        if !cancel.is_cancelled() && !responders.is_empty() {
            let neighbors = neighbor_table().await;
            for addr in responders {
                if let Some(mac) = neighbors.get(&addr) {
                    let sighting = Sighting {
                        mac: Some(mac.clone()),
                        ..Sighting::new(addr)
                    };
                    if tx.send(sighting).await.is_err() {
                        break;
                    }
                }
            }
        }

        Ok(SweepOutcome::Completed)
    }
}

/// One ICMP probe. Errors and timeouts both mean "host not found".
async fn probe(ping_path: &str, addr: Ipv4Addr, timeout: Duration) -> bool {
    let wait_secs = timeout.as_secs().max(1).to_string();
    let child = Command::new(ping_path)
        .args(["-n", "-c", "1", "-W", &wait_secs])
        .arg(addr.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    // Hard upper bound in case ping ignores -W.
    match tokio::time::timeout(timeout + Duration::from_millis(500), child).await {
        Ok(Ok(status)) => status.success(),
        _ => false,
    }
}

/// Read the kernel's IPv4 neighbor table, preferring `/proc/net/arp` and
/// falling back to `ip neigh show`.
async fn neighbor_table() -> HashMap<Ipv4Addr, String> {
    if let Ok(raw) = tokio::fs::read_to_string("/proc/net/arp").await {
        let table = parse_proc_arp(&raw);
        if !table.is_empty() {
            return table;
        }
    }

    let output = Command::new("ip")
        .args(["neigh", "show"])
        .stdin(Stdio::null())
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            parse_ip_neigh(&String::from_utf8_lossy(&out.stdout))
        }
        _ => HashMap::new(),
    }
}

/// `/proc/net/arp` rows: `IP address  HW type  Flags  HW address  Mask  Device`.
/// Flag 0x2 marks a complete entry.
fn parse_proc_arp(raw: &str) -> HashMap<Ipv4Addr, String> {
    let mut table = HashMap::new();
    for line in raw.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (Ok(addr), flags, mac) = (fields[0].parse::<Ipv4Addr>(), fields[2], fields[3]) else {
            continue;
        };
        if flags != "0x2" || mac == "00:00:00:00:00:00" {
            continue;
        }
        table.insert(addr, mac.to_string());
    }
    table
}

/// `ip neigh` rows: `192.168.1.1 dev eth0 lladdr 9c:3d:cf:a1:22:b1 REACHABLE`.
fn parse_ip_neigh(raw: &str) -> HashMap<Ipv4Addr, String> {
    let mut table = HashMap::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(Ok(addr)) = fields.first().map(|f| f.parse::<Ipv4Addr>()) else {
            continue;
        };
        if let Some(pos) = fields.iter().position(|f| *f == "lladdr") {
            if let Some(mac) = fields.get(pos + 1) {
                if fields.last().map_or(false, |s| *s == "FAILED") {
                    continue;
                }
                table.insert(addr, mac.to_string());
            }
        }
    }
    table
}
