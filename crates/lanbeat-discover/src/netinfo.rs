//! Local network context: interface addresses and the default gateway.
//!
//! The planner works against a `NetContext` snapshot so it can be exercised
//! with synthetic data; detection itself is best-effort and never fatal.

use std::net::Ipv4Addr;
use std::process::Stdio;

use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use serde::Deserialize;
use tokio::process::Command;

/// One local IPv4 interface address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceNet {
    pub name: String,
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl IfaceNet {
    /// The network this interface address lives in.
    pub fn network(&self) -> Option<Ipv4Net> {
        Ipv4Net::new(self.addr, self.prefix_len).ok().map(|n| n.trunc())
    }
}

/// Snapshot of the local network topology taken at plan time.
#[derive(Debug, Clone, Default)]
pub struct NetContext {
    pub interfaces: Vec<IfaceNet>,
    pub gateway: Option<Ipv4Addr>,
}

impl NetContext {
    /// Detect interfaces and the default gateway from the running system.
    pub async fn detect() -> Self {
        let interfaces = local_interfaces();
        let gateway = default_gateway().await;
        tracing::debug!(
            interface_count = interfaces.len(),
            gateway = ?gateway,
            "Detected network context"
        );
        Self {
            interfaces,
            gateway,
        }
    }
}

/// Interface name heuristics for VPN/tunnel overlays and container plumbing.
/// Scanning an overlay's carrier-grade-NAT range is almost never useful.
pub fn is_overlay_interface(name: &str) -> bool {
    let lower = name.to_lowercase();
    const OVERLAY_PREFIXES: &[&str] = &["tun", "tap", "wg", "docker", "br-", "veth"];
    const OVERLAY_SUBSTRINGS: &[&str] = &["wireguard", "tailscale", "zerotier"];

    OVERLAY_PREFIXES.iter().any(|p| lower.starts_with(p))
        || OVERLAY_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

/// Whether an address is usable as an automatic scan candidate.
pub fn is_plannable(addr: Ipv4Addr) -> bool {
    addr.is_private() && !addr.is_loopback() && !addr.is_link_local()
}

/// Enumerate local IPv4 interface addresses, excluding loopback.
fn local_interfaces() -> Vec<IfaceNet> {
    let mut out = Vec::new();
    let Ok(ifaces) = get_if_addrs() else {
        return out;
    };
    for iface in ifaces {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            out.push(IfaceNet {
                name: iface.name.clone(),
                addr: v4.ip,
                prefix_len: u32::from(v4.netmask).count_ones() as u8,
            });
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    #[serde(default)]
    gateway: Option<String>,
}

/// Resolve the default IPv4 gateway via `ip -j route show default`.
async fn default_gateway() -> Option<Ipv4Addr> {
    let output = Command::new("ip")
        .args(["-j", "route", "show", "default"])
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_gateway_json(&output.stdout)
}

fn parse_gateway_json(raw: &[u8]) -> Option<Ipv4Addr> {
    let routes: Vec<RouteEntry> = serde_json::from_slice(raw).ok()?;
    routes
        .iter()
        .filter_map(|r| r.gateway.as_deref())
        .find_map(|g| g.parse::<Ipv4Addr>().ok())
}
