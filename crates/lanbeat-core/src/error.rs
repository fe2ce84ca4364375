use thiserror::Error;

/// Errors shared across lanbeat components.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid scan scope: {0} (expected auto, 10, 172, 192, all, or custom)")]
    InvalidScope(String),

    #[error("Invalid CIDR literal: {0}")]
    InvalidCidr(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
