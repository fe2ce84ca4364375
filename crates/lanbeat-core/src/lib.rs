//! lanbeat-core: Shared types, events, and error handling for the lanbeat
//! LAN heartbeat monitor.
//!
//! This crate provides the types shared between the discovery engine and the
//! rest of the product:
//! - Job types (ScanOptions, JobStatus, JobRecord, Progress)
//! - The Device result model
//! - Scan event types for the append-only event log
//! - Common error types

pub mod error;
pub mod events;
pub mod types;

pub use error::CoreError;
