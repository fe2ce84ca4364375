//! Error types for the lanbeat-discover crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("No usable subnets could be determined for this scan")]
    NoUsableSubnets,

    #[error("No host-discovery tool available: {0}")]
    ToolUnavailable(String),

    #[error("nmap exited with code {code}: {stderr}")]
    NmapFailed { code: i32, stderr: String },

    #[error("Failed to parse scanner output: {0}")]
    OutputParse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] lanbeat_core::CoreError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoverError>;
