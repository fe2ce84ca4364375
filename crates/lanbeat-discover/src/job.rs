//! Job orchestration: single-flight start, durable cancellation, and
//! self-healing status reads.
//!
//! The orchestrator and the worker share nothing in memory they could not
//! reconstruct from disk: the job record, the event log, and the cancel
//! flag are the whole contract, so a freshly started process can answer
//! status/result/stream for a job it did not launch.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use lanbeat_core::events::EventPayload;
use lanbeat_core::types::{Device, JobId, JobRecord, JobStatus, JobSummary, Progress, ScanOptions};

use crate::config::DiscoverConfig;
use crate::error::Result;
use crate::eventlog::EventLog;
use crate::executor::ScanBackend;
use crate::inventory::InventorySource;
use crate::worker::{self, WorkerContext};

const WORKER_STOPPED: &str = "worker stopped unexpectedly";

/// Durable storage for the job record and its companion files.
#[derive(Debug, Clone)]
pub struct JobStore {
    state_dir: PathBuf,
}

impl JobStore {
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    pub fn record_path(&self) -> PathBuf {
        self.state_dir.join("scan_job.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join("scan_events.jsonl")
    }

    fn cancel_path(&self) -> PathBuf {
        self.state_dir.join("scan.cancel")
    }

    pub fn load(&self) -> Result<Option<JobRecord>> {
        let raw = match std::fs::read_to_string(self.record_path()) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Atomic overwrite via tmp+rename, so readers never see a torn record.
    pub fn save(&self, record: &JobRecord) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        let tmp = self.record_path().with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(record)?)?;
        std::fs::rename(&tmp, self.record_path())?;
        Ok(())
    }

    /// The durable cancel flag, observable by a worker in any process.
    pub fn request_cancel(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::write(self.cancel_path(), b"cancel")?;
        Ok(())
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_path().exists()
    }

    pub fn clear_cancel(&self) -> Result<()> {
        match std::fs::remove_file(self.cancel_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Result of a start request.
#[derive(Debug, Serialize)]
pub struct StartOutcome {
    /// False when an active job was returned instead of a new one.
    pub accepted: bool,
    pub job: JobSummary,
}

/// Point-in-time job status for UI display.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub job_id: JobId,
    pub state: JobStatus,
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub devices_found: usize,
}

/// Snapshot of the device result model.
#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    pub state: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub devices: Vec<Device>,
}

pub struct Orchestrator<B: ScanBackend> {
    config: DiscoverConfig,
    store: JobStore,
    backend: B,
    inventory: Arc<dyn InventorySource>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Last successfully loaded record, returned when a live read fails.
    last_good: Mutex<Option<JobRecord>>,
}

impl<B: ScanBackend> Orchestrator<B> {
    pub fn new(config: DiscoverConfig, backend: B, inventory: Arc<dyn InventorySource>) -> Self {
        let store = JobStore::new(config.state_dir.clone());
        Self {
            config,
            store,
            backend,
            inventory,
            worker: Arc::new(Mutex::new(None)),
            last_good: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Begin a discovery job, or report the one already running.
    pub async fn start(&self, options: ScanOptions, force: bool) -> Result<StartOutcome> {
        if let Some(record) = self.load_or_heal()? {
            if record.status.is_active() && self.worker_alive(&record) {
                if !force {
                    tracing::info!(job_id = %record.id, "Start refused, job already active");
                    return Ok(StartOutcome {
                        accepted: false,
                        job: record.summary(),
                    });
                }
                self.evict_active(record).await?;
            }
        }

        self.store.clear_cancel()?;
        // Resetting the log here, not in the worker, keeps the ordering
        // guarantee: no subscriber can observe the old job's events after
        // start() has returned a new job id.
        let log = EventLog::create(&self.store.log_path())?;

        let record = JobRecord::new(options);
        self.store.save(&record)?;
        *self.last_good.lock().unwrap() = Some(record.clone());
        let summary = record.summary();

        let known = match self.inventory.snapshot() {
            Ok(known) => known,
            Err(e) => {
                tracing::warn!(error = %e, "Inventory snapshot failed, assuming empty");
                Default::default()
            }
        };

        let ctx = WorkerContext {
            store: self.store.clone(),
            backend: self.backend.clone(),
            known,
            record,
            log,
        };
        let handle = tokio::spawn(worker::run(ctx));
        *self.worker.lock().unwrap() = Some(handle);

        tracing::info!(job_id = %summary.id, "Discovery job started");
        Ok(StartOutcome {
            accepted: true,
            job: summary,
        })
    }

    /// Point-in-time status; degrades a dead worker's record to `error`.
    pub fn status(&self) -> Result<Option<StatusView>> {
        Ok(self.load_or_heal()?.map(|record| StatusView {
            job_id: record.id,
            state: record.status,
            progress: record.progress.clone(),
            error: record.error.clone(),
            devices_found: record.devices.len(),
        }))
    }

    /// Request cancellation of the active job. Returns false (a no-op)
    /// when nothing is running.
    pub async fn cancel(&self) -> Result<bool> {
        let Some(mut record) = self.load_or_heal()? else {
            return Ok(false);
        };
        if !record.status.is_active() {
            return Ok(false);
        }

        self.store.request_cancel()?;
        record.status = JobStatus::Cancelling;
        self.store.save(&record)?;
        *self.last_good.lock().unwrap() = Some(record.clone());
        tracing::info!(job_id = %record.id, "Cancellation requested");

        // A worker that never reaches a checkpoint gets force-killed once
        // the grace period runs out.
        let store = self.store.clone();
        let worker = self.worker.clone();
        let grace = self.config.cancel_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let still_active = matches!(store.load(), Ok(Some(r)) if r.status.is_active());
            if still_active {
                if let Some(handle) = worker.lock().unwrap().take() {
                    tracing::warn!("Worker missed the cancel grace period, force-killing");
                    handle.abort();
                }
                finalize_cancelled(&store);
            }
        });

        Ok(true)
    }

    /// Final or in-progress snapshot of the device result model.
    pub fn result(&self) -> Result<Option<ResultView>> {
        Ok(self.load_or_heal()?.map(|record| ResultView {
            state: record.status,
            error: record.error.clone(),
            devices: record.devices.into_values().collect(),
        }))
    }

    /// Wait for the in-process worker to finish, if one was spawned here.
    pub async fn wait(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Liveness predicate: a worker is alive while its heartbeat is fresh.
    /// Deliberately not a process-table check; a zombie never heartbeats.
    fn worker_alive(&self, record: &JobRecord) -> bool {
        let age = Utc::now().signed_duration_since(record.heartbeat);
        age < chrono::Duration::from_std(self.config.liveness_timeout())
            .unwrap_or_else(|_| chrono::Duration::seconds(120))
    }

    /// Load the persisted record, healing a dead worker's state and
    /// falling back to the last good snapshot on a failed read.
    fn load_or_heal(&self) -> Result<Option<JobRecord>> {
        match self.store.load() {
            Ok(Some(mut record)) => {
                if record.status.is_active() && !self.worker_alive(&record) {
                    tracing::warn!(
                        job_id = %record.id,
                        heartbeat = %record.heartbeat,
                        "Worker heartbeat stale, degrading job to error"
                    );
                    record.status = JobStatus::Error;
                    record.error = Some(WORKER_STOPPED.to_string());
                    record.finished_at = Some(Utc::now());
                    self.store.save(&record)?;
                    append_final_status(&self.store, &record, WORKER_STOPPED);
                }
                *self.last_good.lock().unwrap() = Some(record.clone());
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                let snapshot = self.last_good.lock().unwrap().clone();
                match snapshot {
                    Some(record) => {
                        tracing::warn!(error = %e, "Job record read failed, serving last good snapshot");
                        Ok(Some(record))
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Force path: cancel the active job and wait for it to die.
    async fn evict_active(&self, record: JobRecord) -> Result<()> {
        tracing::info!(job_id = %record.id, "Force start: cancelling active job");
        self.store.request_cancel()?;
        let deadline = tokio::time::Instant::now() + self.config.cancel_grace();

        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            match self.store.load() {
                Ok(Some(current)) if current.status.is_active() => {
                    if tokio::time::Instant::now() >= deadline {
                        if let Some(handle) = self.worker.lock().unwrap().take() {
                            handle.abort();
                        }
                        finalize_cancelled(&self.store);
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }
}

/// Mark the persisted record cancelled on behalf of a force-killed worker.
fn finalize_cancelled(store: &JobStore) {
    let Ok(Some(mut record)) = store.load() else {
        return;
    };
    record.status = JobStatus::Cancelled;
    record.finished_at = Some(Utc::now());
    if store.save(&record).is_err() {
        return;
    }
    append_final_status(store, &record, "scan cancelled");
}

fn append_final_status(store: &JobStore, record: &JobRecord, message: &str) {
    if let Ok(mut log) = EventLog::resume(&store.log_path()) {
        let _ = log.append(EventPayload::Status {
            state: record.status,
            message: message.to_string(),
            current: record.progress.current,
            total: record.progress.total,
        });
    }
}
