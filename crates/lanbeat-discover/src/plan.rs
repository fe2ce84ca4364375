//! CIDR planner: computes the ordered, deduplicated, size-capped set of
//! /24 scan units for a job.
//!
//! Candidates wider than /24 are always split into /24 chunks so a single
//! scan unit stays short, progress stays meaningful, and cancellation takes
//! effect promptly.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use lanbeat_core::types::{ScanOptions, ScanScope};

use crate::error::{DiscoverError, Result};
use crate::netinfo::{is_overlay_interface, is_plannable, NetContext};

const SERIES_10: &str = "10.0.0.0/8";
const SERIES_172: &str = "172.16.0.0/12";
const SERIES_192: &str = "192.168.0.0/16";

/// Compute the subnet plan for a job.
pub fn plan(options: &ScanOptions, net: &NetContext, known: &[Ipv4Addr]) -> Result<Vec<Ipv4Net>> {
    let mut builder = PlanBuilder::new(options.subnet_cap);

    match &options.scope {
        ScanScope::Auto => plan_auto(options, net, known, &mut builder),
        ScanScope::Series { series } => plan_series(series, net, &mut builder),
        ScanScope::Custom => plan_custom(&options.custom_ranges, &mut builder),
    }

    let subnets = builder.finish();
    if subnets.is_empty() {
        return Err(DiscoverError::NoUsableSubnets);
    }

    tracing::info!(
        subnet_count = subnets.len(),
        first = %subnets[0],
        "Scan plan computed"
    );
    Ok(subnets)
}

fn plan_auto(
    options: &ScanOptions,
    net: &NetContext,
    known: &[Ipv4Addr],
    builder: &mut PlanBuilder,
) {
    // Gateway-first heuristic: the operator's own network almost always
    // hangs off the default gateway, so its /16 family goes first.
    if let Some(gw) = net.gateway.filter(|g| g.is_private()) {
        if let Ok(family) = Ipv4Net::new(gw, 16) {
            builder.add_chunked(family.trunc());
        }
    }

    for iface in &net.interfaces {
        if let Some(hint) = &options.interface_hint {
            if &iface.name != hint {
                continue;
            }
        } else if is_overlay_interface(&iface.name) {
            tracing::debug!(interface = %iface.name, "Skipping overlay interface");
            continue;
        }
        if !is_plannable(iface.addr) {
            continue;
        }
        if let Some(network) = iface.network() {
            builder.add_chunked(network);
        }
    }

    // Each already-known inventory address pulls in its containing /24.
    for &addr in known {
        if !is_plannable(addr) {
            continue;
        }
        if let Ok(unit) = Ipv4Net::new(addr, 24) {
            builder.add(unit.trunc());
        }
    }
}

fn plan_series(series: &str, net: &NetContext, builder: &mut PlanBuilder) {
    let ranges: Vec<Ipv4Net> = match series {
        "10" => vec![SERIES_10.parse().unwrap()],
        "172" => vec![SERIES_172.parse().unwrap()],
        "192" => vec![SERIES_192.parse().unwrap()],
        "all" => vec![
            SERIES_10.parse().unwrap(),
            SERIES_172.parse().unwrap(),
            SERIES_192.parse().unwrap(),
        ],
        other => {
            tracing::warn!(series = %other, "Unknown series selector");
            Vec::new()
        }
    };

    // Bias early results toward the operator's own network: when the
    // gateway falls inside a requested series, its /16 is enumerated first.
    if let Some(gw) = net.gateway.filter(|g| g.is_private()) {
        if ranges.iter().any(|r| r.contains(&gw)) {
            if let Ok(family) = Ipv4Net::new(gw, 16) {
                builder.add_chunked(family.trunc());
            }
        }
    }

    for range in ranges {
        builder.add_chunked(range);
    }
}

fn plan_custom(ranges: &[String], builder: &mut PlanBuilder) {
    for literal in ranges {
        match literal.parse::<Ipv4Net>() {
            Ok(net) => builder.add_chunked(net),
            // Invalid operator input is dropped, not fatal.
            Err(e) => {
                tracing::debug!(literal = %literal, error = %e, "Dropping invalid CIDR literal")
            }
        }
    }
}

/// Ordered, deduplicating, capped accumulator for scan units.
struct PlanBuilder {
    seen: HashSet<Ipv4Net>,
    list: Vec<Ipv4Net>,
    cap: usize,
}

impl PlanBuilder {
    fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            list: Vec::new(),
            cap: cap.max(1),
        }
    }

    fn is_full(&self) -> bool {
        self.list.len() >= self.cap
    }

    /// Add one /24-or-narrower unit, normalized to its network address.
    fn add(&mut self, unit: Ipv4Net) {
        if self.is_full() {
            return;
        }
        let unit = unit.trunc();
        if self.seen.insert(unit) {
            self.list.push(unit);
        }
    }

    /// Add a candidate of any width, splitting anything wider than /24.
    fn add_chunked(&mut self, candidate: Ipv4Net) {
        if candidate.prefix_len() >= 24 {
            self.add(candidate);
            return;
        }
        if let Ok(chunks) = candidate.subnets(24) {
            for chunk in chunks {
                if self.is_full() {
                    // Truncation is silent; the cap bounds worst-case runtime.
                    return;
                }
                self.add(chunk);
            }
        }
    }

    fn finish(self) -> Vec<Ipv4Net> {
        self.list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netinfo::IfaceNet;
    use lanbeat_core::types::ScanProfile;

    fn options(scope: ScanScope, ranges: &[&str]) -> ScanOptions {
        ScanOptions {
            scope,
            custom_ranges: ranges.iter().map(|s| s.to_string()).collect(),
            interface_hint: None,
            profile: ScanProfile::Normal,
            subnet_cap: 4096,
        }
    }

    fn ctx(gateway: Option<&str>, ifaces: &[(&str, &str, u8)]) -> NetContext {
        NetContext {
            gateway: gateway.map(|g| g.parse().unwrap()),
            interfaces: ifaces
                .iter()
                .map(|(name, addr, prefix)| IfaceNet {
                    name: name.to_string(),
                    addr: addr.parse().unwrap(),
                    prefix_len: *prefix,
                })
                .collect(),
        }
    }

    #[test]
    fn custom_narrow_range_passes_through() {
        let opts = options(ScanScope::Custom, &["192.0.2.0/30"]);
        let subnets = plan(&opts, &NetContext::default(), &[]).unwrap();
        assert_eq!(subnets, vec!["192.0.2.0/30".parse::<Ipv4Net>().unwrap()]);
    }

    #[test]
    fn nothing_wider_than_a_24_survives() {
        let opts = options(ScanScope::Custom, &["10.1.0.0/16", "172.16.8.0/22"]);
        let subnets = plan(&opts, &NetContext::default(), &[]).unwrap();
        assert_eq!(subnets.len(), 256 + 4);
        assert!(subnets.iter().all(|s| s.prefix_len() >= 24));
        assert_eq!(subnets[0].to_string(), "10.1.0.0/24");
    }

    #[test]
    fn invalid_literals_are_dropped_silently() {
        let opts = options(ScanScope::Custom, &["not-a-cidr", "10.9.8.0/24"]);
        let subnets = plan(&opts, &NetContext::default(), &[]).unwrap();
        assert_eq!(subnets.len(), 1);
    }

    #[test]
    fn all_invalid_custom_is_a_planning_error() {
        let opts = options(ScanScope::Custom, &["bogus", "300.1.2.3/24"]);
        let err = plan(&opts, &NetContext::default(), &[]).unwrap_err();
        assert!(matches!(err, DiscoverError::NoUsableSubnets));
    }

    #[test]
    fn auto_plans_gateway_family_first() {
        let net = ctx(Some("10.5.0.1"), &[("eth0", "192.168.1.42", 24)]);
        let subnets = plan(&options(ScanScope::Auto, &[]), &net, &[]).unwrap();
        assert_eq!(subnets[0].to_string(), "10.5.0.0/24");
        assert_eq!(subnets.len(), 256 + 1);
        assert!(subnets.contains(&"192.168.1.0/24".parse().unwrap()));
    }

    #[test]
    fn auto_skips_overlay_interfaces_and_public_gateways() {
        let net = ctx(
            Some("203.0.113.1"),
            &[
                ("wg0", "100.64.0.5", 10),
                ("tailscale0", "100.101.0.2", 32),
                ("eth0", "192.168.4.9", 24),
            ],
        );
        let subnets = plan(&options(ScanScope::Auto, &[]), &net, &[]).unwrap();
        assert_eq!(subnets, vec!["192.168.4.0/24".parse::<Ipv4Net>().unwrap()]);
    }

    #[test]
    fn interface_hint_restricts_auto_candidates() {
        let net = ctx(
            None,
            &[("eth0", "192.168.4.9", 24), ("eth1", "10.2.7.3", 24)],
        );
        let mut opts = options(ScanScope::Auto, &[]);
        opts.interface_hint = Some("eth1".to_string());
        let subnets = plan(&opts, &net, &[]).unwrap();
        assert_eq!(subnets, vec!["10.2.7.0/24".parse::<Ipv4Net>().unwrap()]);
    }

    #[test]
    fn known_addresses_expand_to_their_24() {
        let net = ctx(None, &[("eth0", "192.168.4.9", 24)]);
        let known: Vec<Ipv4Addr> = vec!["10.30.2.77".parse().unwrap()];
        let subnets = plan(&options(ScanScope::Auto, &[]), &net, &known).unwrap();
        assert_eq!(subnets.len(), 2);
        assert_eq!(subnets[1].to_string(), "10.30.2.0/24");
    }

    #[test]
    fn duplicates_are_removed_preserving_order() {
        let opts = options(
            ScanScope::Custom,
            &["192.168.1.0/24", "192.168.1.128/24", "192.168.2.0/24"],
        );
        let subnets = plan(&opts, &NetContext::default(), &[]).unwrap();
        // 192.168.1.128/24 normalizes to 192.168.1.0/24 and dedups away.
        assert_eq!(subnets.len(), 2);
        assert_eq!(subnets[0].to_string(), "192.168.1.0/24");
    }

    #[test]
    fn series_192_enumerates_the_rfc1918_block() {
        let subnets = plan(
            &options(
                ScanScope::Series {
                    series: "192".to_string(),
                },
                &[],
            ),
            &NetContext::default(),
            &[],
        )
        .unwrap();
        assert_eq!(subnets.len(), 256);
        assert_eq!(subnets[0].to_string(), "192.168.0.0/24");
        assert_eq!(subnets[255].to_string(), "192.168.255.0/24");
    }

    #[test]
    fn series_prefers_gateway_subrange() {
        let net = ctx(Some("10.77.0.1"), &[]);
        let subnets = plan(
            &options(
                ScanScope::Series {
                    series: "10".to_string(),
                },
                &[],
            ),
            &net,
            &[],
        )
        .unwrap();
        assert_eq!(subnets[0].to_string(), "10.77.0.0/24");
    }

    #[test]
    fn plan_truncates_at_the_subnet_cap() {
        let mut opts = options(
            ScanScope::Series {
                series: "10".to_string(),
            },
            &[],
        );
        opts.subnet_cap = 100;
        let subnets = plan(&opts, &NetContext::default(), &[]).unwrap();
        assert_eq!(subnets.len(), 100);
    }
}
