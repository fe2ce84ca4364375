//! Event types for the discovery event log.
//!
//! Every fact that happens during a job (status changes, discovered devices,
//! errors) is appended to an event log as a `ScanEvent` and replayed by
//! stream subscribers. Events are immutable once appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Device, JobStatus};

/// One immutable fact appended to the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    /// Strictly increasing, assigned at append time. Subscribers resume
    /// after a disconnect by supplying the last sequence id they saw.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl ScanEvent {
    pub fn new(seq: u64, payload: EventPayload) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// A terminal status event ends the stream for subscribers.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::Status { state, .. } if state.is_terminal()
        )
    }
}

/// Kind-specific event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventPayload {
    /// Job state change or per-subnet progress.
    Status {
        state: JobStatus,
        message: String,
        current: u32,
        total: u32,
    },
    /// A device was discovered or enriched.
    Device { device: Device },
    /// A problem. Non-fatal errors are warnings (e.g. a skipped subnet);
    /// fatal ones accompany the job's transition to `error`.
    Error { message: String, fatal: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_tags() {
        let event = ScanEvent::new(
            3,
            EventPayload::Device {
                device: Device::new("10.0.1.9".parse().unwrap()),
            },
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"device\""));
        assert!(json.contains("\"seq\":3"));

        let back: ScanEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seq, 3);
    }

    #[test]
    fn terminal_detection() {
        let done = ScanEvent::new(
            9,
            EventPayload::Status {
                state: JobStatus::Done,
                message: "scan complete".to_string(),
                current: 4,
                total: 4,
            },
        );
        assert!(done.is_terminal());

        let progress = ScanEvent::new(
            2,
            EventPayload::Status {
                state: JobStatus::Running,
                message: "probing 10.0.1.0/24".to_string(),
                current: 1,
                total: 4,
            },
        );
        assert!(!progress.is_terminal());

        let warning = ScanEvent::new(
            5,
            EventPayload::Error {
                message: "subnet too large, skipped".to_string(),
                fatal: false,
            },
        );
        assert!(!warning.is_terminal());
    }
}
