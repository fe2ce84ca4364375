//! Nmap output parsing.
//!
//! Nmap's output format varies by version and invocation, so parsing sits
//! behind one narrow interface: feed raw stdout chunks in, get sightings
//! out as soon as they are complete. Two adapters exist: the streaming XML
//! format (`-oX -`, preferred) and the plain-text report format used as a
//! compatibility fallback. Both are tested against literal fixtures.

use std::net::Ipv4Addr;

use serde::Deserialize;

use crate::results::Sighting;

/// Incremental parser for one raw scanner output format.
///
/// Implementations must surface each discovered host as soon as its record
/// is complete in the input, not when the process exits; this is what lets
/// devices reach the event log mid-subnet and cancellation bite early.
pub trait ReportParser: Send {
    /// Feed the next chunk of raw output.
    fn push(&mut self, chunk: &[u8]) -> Vec<Sighting>;

    /// Drain anything still being assembled once the output ends.
    fn finish(&mut self) -> Vec<Sighting>;
}

// ── XML adapter ───────────────────────────────────────────────────

/// `<host>` element from nmap's XML output, as flushed per discovered host.
#[derive(Debug, Deserialize)]
struct XmlHost {
    status: Option<XmlStatus>,
    #[serde(rename = "address", default)]
    addresses: Vec<XmlAddress>,
    hostnames: Option<XmlHostnames>,
}

#[derive(Debug, Deserialize)]
struct XmlStatus {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct XmlAddress {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addr_type: String,
    #[serde(rename = "@vendor")]
    vendor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlHostnames {
    #[serde(rename = "hostname", default)]
    hostnames: Vec<XmlHostname>,
}

#[derive(Debug, Deserialize)]
struct XmlHostname {
    #[serde(rename = "@name")]
    name: String,
}

impl XmlHost {
    fn into_sighting(self) -> Option<Sighting> {
        if let Some(status) = &self.status {
            if status.state != "up" {
                return None;
            }
        }
        let address: Ipv4Addr = self
            .addresses
            .iter()
            .find(|a| a.addr_type == "ipv4")
            .and_then(|a| a.addr.parse().ok())?;

        let mac_entry = self.addresses.iter().find(|a| a.addr_type == "mac");
        Some(Sighting {
            address,
            hostname: self
                .hostnames
                .and_then(|hn| hn.hostnames.into_iter().next())
                .map(|h| h.name),
            mac: mac_entry.map(|a| a.addr.clone()),
            vendor: mac_entry.and_then(|a| a.vendor.clone()),
        })
    }
}

/// Streaming parser for `nmap -oX -`.
///
/// Nmap flushes each `<host>…</host>` element as the host is found, so
/// complete elements are cut out of the byte stream and deserialized one
/// at a time.
#[derive(Default)]
pub struct XmlStreamParser {
    buf: String,
}

impl XmlStreamParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportParser for XmlStreamParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<Sighting> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut out = Vec::new();
        while let Some(close) = self.buf.find("</host>") {
            let end = close + "</host>".len();
            let open = match (self.buf[..close].find("<host>"), self.buf[..close].find("<host ")) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            if let Some(start) = open {
                let element = &self.buf[start..end];
                match quick_xml::de::from_str::<XmlHost>(element) {
                    Ok(host) => out.extend(host.into_sighting()),
                    Err(e) => tracing::debug!(error = %e, "Skipping unparseable host element"),
                }
            }
            self.buf.drain(..end);
        }
        out
    }

    fn finish(&mut self) -> Vec<Sighting> {
        self.buf.clear();
        Vec::new()
    }
}

// ── Plain-text adapter ────────────────────────────────────────────

/// Line parser for nmap's human-readable report format:
///
/// ```text
/// Nmap scan report for router.lan (192.168.1.1)
/// Host is up (0.0012s latency).
/// MAC Address: 9C:3D:CF:A1:22:B1 (Netgear)
/// ```
#[derive(Default)]
pub struct TextReportParser {
    buf: String,
    current: Option<Sighting>,
}

impl TextReportParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn consume_line(&mut self, line: &str, out: &mut Vec<Sighting>) {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Nmap scan report for ") {
            out.extend(self.current.take());
            if rest.ends_with("[host down]") {
                return;
            }
            self.current = parse_report_target(rest);
        } else if let Some(rest) = line.strip_prefix("MAC Address: ") {
            if let Some(current) = &mut self.current {
                let (mac, vendor) = parse_mac_line(rest);
                current.mac = Some(mac);
                current.vendor = vendor;
            }
        }
    }
}

/// `router.lan (192.168.1.1)` or a bare `192.168.1.1`.
fn parse_report_target(rest: &str) -> Option<Sighting> {
    let rest = rest.trim();
    if let Some(open) = rest.rfind(" (") {
        let inner = rest[open + 2..].trim_end_matches(')');
        if let Ok(address) = inner.parse::<Ipv4Addr>() {
            return Some(Sighting {
                hostname: Some(rest[..open].trim().to_string()),
                ..Sighting::new(address)
            });
        }
    }
    rest.parse::<Ipv4Addr>().ok().map(Sighting::new)
}

/// `9C:3D:CF:A1:22:B1 (Netgear)`; the vendor part is optional.
fn parse_mac_line(rest: &str) -> (String, Option<String>) {
    match rest.split_once(" (") {
        Some((mac, vendor)) => {
            let vendor = vendor.trim_end_matches(')').trim();
            let vendor = if vendor.is_empty() || vendor == "Unknown" {
                None
            } else {
                Some(vendor.to_string())
            };
            (mac.trim().to_string(), vendor)
        }
        None => (rest.trim().to_string(), None),
    }
}

impl ReportParser for TextReportParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<Sighting> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut out = Vec::new();
        while let Some(nl) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=nl).collect();
            self.consume_line(&line, &mut out);
        }
        out
    }

    fn finish(&mut self) -> Vec<Sighting> {
        let mut out = Vec::new();
        let tail: String = std::mem::take(&mut self.buf);
        if !tail.is_empty() {
            self.consume_line(&tail, &mut out);
        }
        out.extend(self.current.take());
        out
    }
}

// ── Format selection ──────────────────────────────────────────────

/// Parser that defers format selection to the first byte of output.
///
/// `-oX -` is always requested, but wrapper scripts and stripped-down nmap
/// builds ignore it and emit the plain-text report instead. Input is
/// buffered until the first non-whitespace byte arrives: `<` selects the
/// XML adapter, anything else the text adapter.
#[derive(Default)]
pub struct AutoReportParser {
    inner: Option<Box<dyn ReportParser>>,
    buf: Vec<u8>,
}

impl AutoReportParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn select(first: u8) -> Box<dyn ReportParser> {
        if first == b'<' {
            Box::new(XmlStreamParser::new())
        } else {
            Box::new(TextReportParser::new())
        }
    }
}

impl ReportParser for AutoReportParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<Sighting> {
        if let Some(inner) = &mut self.inner {
            return inner.push(chunk);
        }

        self.buf.extend_from_slice(chunk);
        let Some(&first) = self.buf.iter().find(|b| !b.is_ascii_whitespace()) else {
            return Vec::new();
        };
        let mut inner = Self::select(first);
        let buffered = std::mem::take(&mut self.buf);
        let out = inner.push(&buffered);
        self.inner = Some(inner);
        out
    }

    fn finish(&mut self) -> Vec<Sighting> {
        match &mut self.inner {
            Some(inner) => inner.finish(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_SCAN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sn -n -oX - 10.0.1.0/24">
<host><status state="up" reason="arp-response"/>
<address addr="10.0.1.1" addrtype="ipv4"/>
<address addr="AA:BB:CC:DD:EE:01" addrtype="mac" vendor="TestVendor"/>
</host>
<host><status state="up" reason="syn-ack"/>
<address addr="10.0.1.10" addrtype="ipv4"/>
<hostnames><hostname name="printer.lan" type="PTR"/></hostnames>
</host>
<host><status state="down" reason="no-response"/>
<address addr="10.0.1.99" addrtype="ipv4"/>
</host>
<runstats><finished time="1740400000" elapsed="2.50"/><hosts up="2" down="1" total="3"/></runstats>
</nmaprun>"#;

    #[test]
    fn xml_parses_up_hosts_with_mac_and_vendor() {
        let mut parser = XmlStreamParser::new();
        let mut sightings = parser.push(PING_SCAN_XML.as_bytes());
        sightings.extend(parser.finish());

        assert_eq!(sightings.len(), 2);
        assert_eq!(sightings[0].address.to_string(), "10.0.1.1");
        assert_eq!(sightings[0].mac.as_deref(), Some("AA:BB:CC:DD:EE:01"));
        assert_eq!(sightings[0].vendor.as_deref(), Some("TestVendor"));
        assert_eq!(sightings[1].hostname.as_deref(), Some("printer.lan"));
        assert_eq!(sightings[1].mac, None);
    }

    #[test]
    fn xml_surfaces_hosts_before_the_document_ends() {
        let mut parser = XmlStreamParser::new();
        let split = PING_SCAN_XML.find("</host>").unwrap() + "</host>".len();

        let early = parser.push(PING_SCAN_XML[..split].as_bytes());
        assert_eq!(early.len(), 1, "first host must surface immediately");

        let late = parser.push(PING_SCAN_XML[split..].as_bytes());
        assert_eq!(late.len(), 1);
    }

    #[test]
    fn xml_tolerates_chunks_split_mid_element() {
        let mut parser = XmlStreamParser::new();
        let mut sightings = Vec::new();
        for chunk in PING_SCAN_XML.as_bytes().chunks(7) {
            sightings.extend(parser.push(chunk));
        }
        sightings.extend(parser.finish());
        assert_eq!(sightings.len(), 2);
    }

    const TEXT_REPORT: &str = "\
Starting Nmap 7.94 ( https://nmap.org ) at 2026-02-02 10:00 UTC
Nmap scan report for router.lan (192.168.1.1)
Host is up (0.0012s latency).
MAC Address: 9C:3D:CF:A1:22:B1 (Netgear)
Nmap scan report for 192.168.1.23
Host is up (0.041s latency).
MAC Address: 00:11:22:33:44:55 (Unknown)
Nmap scan report for 192.168.1.77 [host down]
Nmap scan report for 192.168.1.200
Host is up.
Nmap done: 256 IP addresses (3 hosts up) scanned in 4.12 seconds
";

    #[test]
    fn text_parses_report_variants() {
        let mut parser = TextReportParser::new();
        let mut sightings = parser.push(TEXT_REPORT.as_bytes());
        sightings.extend(parser.finish());

        assert_eq!(sightings.len(), 3);
        assert_eq!(sightings[0].hostname.as_deref(), Some("router.lan"));
        assert_eq!(sightings[0].address.to_string(), "192.168.1.1");
        assert_eq!(sightings[0].vendor.as_deref(), Some("Netgear"));
        assert_eq!(sightings[1].address.to_string(), "192.168.1.23");
        assert_eq!(sightings[1].vendor, None, "Unknown vendor is dropped");
        assert_eq!(sightings[2].address.to_string(), "192.168.1.200");
        assert_eq!(sightings[2].mac, None);
    }

    #[test]
    fn auto_parser_selects_xml_from_the_first_byte() {
        let mut parser = AutoReportParser::new();
        let mut sightings = Vec::new();
        for chunk in PING_SCAN_XML.as_bytes().chunks(11) {
            sightings.extend(parser.push(chunk));
        }
        sightings.extend(parser.finish());
        assert_eq!(sightings.len(), 2);
        assert_eq!(sightings[0].mac.as_deref(), Some("AA:BB:CC:DD:EE:01"));
    }

    #[test]
    fn auto_parser_falls_back_to_text_output() {
        let mut parser = AutoReportParser::new();
        // Leading whitespace alone must not force a decision.
        assert!(parser.push(b"  \n").is_empty());

        let mut sightings = parser.push(TEXT_REPORT.as_bytes());
        sightings.extend(parser.finish());
        assert_eq!(sightings.len(), 3);
        assert_eq!(sightings[0].hostname.as_deref(), Some("router.lan"));
    }

    #[test]
    fn text_emits_each_host_as_its_block_completes() {
        let mut parser = TextReportParser::new();
        let first = parser.push(
            b"Nmap scan report for 10.0.0.1\nHost is up.\nNmap scan report for 10.0.0.2\n",
        );
        // The first host is complete as soon as the next report line starts.
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].address.to_string(), "10.0.0.1");

        let rest = parser.finish();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].address.to_string(), "10.0.0.2");
    }
}
