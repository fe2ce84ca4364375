//! Nmap process wrapper.
//!
//! Executes nmap in host-discovery mode as a child process via
//! `tokio::process::Command`, streaming its output into sightings as hosts
//! are found rather than buffering until exit. XML output is requested but
//! the parser adapts to plain-text report output when the tool ignores the
//! flag. Cancellation kills the child promptly.

use std::process::Stdio;

use ipnet::Ipv4Net;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lanbeat_core::types::ScanProfile;

use crate::config::nmap_flags;
use crate::error::{DiscoverError, Result};
use crate::nmap_output::{AutoReportParser, ReportParser};
use crate::results::Sighting;

/// Wrapper around the nmap binary.
#[derive(Debug, Clone)]
pub struct NmapScanner {
    nmap_path: String,
}

impl NmapScanner {
    pub fn new(nmap_path: &str) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
        }
    }

    /// Verify nmap is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DiscoverError::ToolUnavailable(format!("{}: {e}", self.nmap_path))
            })?;

        String::from_utf8(output.stdout)
            .map_err(|e| DiscoverError::OutputParse(e.to_string()))
    }

    /// Run one host-discovery pass over a subnet.
    ///
    /// Sightings are sent through `tx` as soon as each host's record is
    /// complete in the output stream. Returns once the child exits or the
    /// token cancels it.
    pub async fn scan(
        &self,
        subnet: Ipv4Net,
        profile: ScanProfile,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<Sighting>,
    ) -> Result<()> {
        let flags = nmap_flags(profile);
        tracing::info!(cidr = %subnet, profile = ?profile, "Starting nmap host discovery");

        let mut child = Command::new(&self.nmap_path)
            .args(&flags)
            .arg("-oX")
            .arg("-")
            .arg(subnet.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DiscoverError::ToolUnavailable(format!("{}: {e}", self.nmap_path))
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| DiscoverError::OutputParse("nmap stdout not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DiscoverError::OutputParse("nmap stderr not captured".into()))?;

        // Drained concurrently: a child that fills the stderr pipe buffer
        // would otherwise block and stall the subnet.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let mut parser = AutoReportParser::new();
        let mut buf = [0u8; 4096];
        let mut found = 0usize;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(cidr = %subnet, "Cancellation requested, killing nmap");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Ok(());
                }
                read = stdout.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        break;
                    }
                    for sighting in parser.push(&buf[..n]) {
                        found += 1;
                        if tx.send(sighting).await.is_err() {
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            return Ok(());
                        }
                    }
                }
            }
        }

        for sighting in parser.finish() {
            found += 1;
            if tx.send(sighting).await.is_err() {
                break;
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let stderr_buf = stderr_task.await.unwrap_or_default();
            return Err(DiscoverError::NmapFailed {
                code: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
            });
        }

        tracing::info!(cidr = %subnet, hosts_up = found, "Nmap host discovery complete");
        Ok(())
    }
}
