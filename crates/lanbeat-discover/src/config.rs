//! Configuration for the lanbeat-discover engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use lanbeat_core::types::ScanProfile;

/// Top-level discover configuration.
///
/// Loaded from `lanbeat.toml` `[discover]` section or
/// `LANBEAT_DISCOVER__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverConfig {
    /// Directory for the job record, event log, and cancel flag.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Path to the nmap binary (default: "nmap").
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// Path to the system ping binary, used by the fallback sweep.
    #[serde(default = "default_ping_path")]
    pub ping_path: String,

    /// Path to the monitoring inventory's target file.
    #[serde(default)]
    pub inventory_path: Option<PathBuf>,

    /// Default subnet cap when the start request does not supply one.
    #[serde(default = "default_subnet_cap")]
    pub subnet_cap: usize,

    /// Fallback sweep refuses subnets with more host addresses than this.
    #[serde(default = "default_sweep_ceiling")]
    pub sweep_host_ceiling: usize,

    /// A worker heartbeat older than this is treated as a dead worker.
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_secs: u64,

    /// Grace period a cancelled worker gets before being force-killed.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,

    /// How often a stream subscriber polls the log for new events.
    #[serde(default = "default_stream_poll_ms")]
    pub stream_poll_ms: u64,

    /// Idle interval after which a stream subscriber gets a liveness ping.
    #[serde(default = "default_stream_ping")]
    pub stream_ping_secs: u64,
}

impl DiscoverConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn stream_poll(&self) -> Duration {
        Duration::from_millis(self.stream_poll_ms)
    }

    pub fn stream_ping(&self) -> Duration {
        Duration::from_secs(self.stream_ping_secs)
    }
}

/// Tuning knobs for the fallback ping sweep, derived from the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepTuning {
    /// Concurrent probes in flight.
    pub concurrency: usize,
    /// Per-probe timeout handed to ping's `-W`.
    pub probe_timeout: Duration,
}

impl SweepTuning {
    pub fn for_profile(profile: ScanProfile) -> Self {
        match profile {
            ScanProfile::Safe => Self {
                concurrency: 16,
                probe_timeout: Duration::from_millis(1500),
            },
            ScanProfile::Normal => Self {
                concurrency: 64,
                probe_timeout: Duration::from_millis(1000),
            },
            ScanProfile::Fast => Self {
                concurrency: 128,
                probe_timeout: Duration::from_millis(500),
            },
        }
    }
}

/// Nmap timing flags for a profile.
///
/// All profiles stay in host-discovery mode (`-sn`) with reverse DNS off
/// (`-n`); the engine does its own, time-bounded, resolution later. The
/// per-host timeout keeps one unreachable host from stalling a subnet.
pub fn nmap_flags(profile: ScanProfile) -> Vec<&'static str> {
    let mut flags = vec!["-sn", "-n"];
    match profile {
        ScanProfile::Safe => {
            flags.extend(["-T2", "--scan-delay", "50ms", "--max-retries", "1"]);
            flags.extend(["--host-timeout", "3s"]);
        }
        ScanProfile::Normal => {
            flags.extend(["-T3", "--max-retries", "2"]);
            flags.extend(["--host-timeout", "3s"]);
        }
        ScanProfile::Fast => {
            flags.extend(["-T4", "--max-retries", "1"]);
            flags.extend(["--host-timeout", "2s"]);
        }
    }
    flags
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/lanbeat")
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_ping_path() -> String {
    "ping".to_string()
}

fn default_subnet_cap() -> usize {
    4096
}

fn default_sweep_ceiling() -> usize {
    1024
}

fn default_liveness_timeout() -> u64 {
    120
}

fn default_cancel_grace() -> u64 {
    5
}

fn default_stream_poll_ms() -> u64 {
    300
}

fn default_stream_ping() -> u64 {
    15
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            nmap_path: default_nmap_path(),
            ping_path: default_ping_path(),
            inventory_path: None,
            subnet_cap: default_subnet_cap(),
            sweep_host_ceiling: default_sweep_ceiling(),
            liveness_timeout_secs: default_liveness_timeout(),
            cancel_grace_secs: default_cancel_grace(),
            stream_poll_ms: default_stream_poll_ms(),
            stream_ping_secs: default_stream_ping(),
        }
    }
}

/// Load configuration, layering the config file under environment variables.
pub fn load(file_prefix: &str) -> crate::error::Result<DiscoverConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("LANBEAT_DISCOVER")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| crate::error::DiscoverError::Config(e.to_string()))?;

    match cfg.get::<DiscoverConfig>("discover") {
        Ok(c) => Ok(c),
        Err(_) => Ok(DiscoverConfig::default()),
    }
}
