//! The discovery worker: plans subnets, drives the scan backend over each
//! one, and checkpoints progress to the job record and event log.
//!
//! The worker is the single writer of both files. Every checkpoint also
//! touches the heartbeat, which is what the orchestrator's liveness
//! predicate reads.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use lanbeat_core::events::EventPayload;
use lanbeat_core::types::{JobRecord, JobStatus};

use crate::enrich;
use crate::error::Result;
use crate::eventlog::EventLog;
use crate::executor::{ScanBackend, ScanUnitOutcome};
use crate::job::JobStore;
use crate::netinfo::NetContext;
use crate::plan;
use crate::results::{ResultSet, Sighting};

/// How often the durable cancel flag is checked.
const CANCEL_POLL: Duration = Duration::from_millis(250);
/// Heartbeat refresh while a subnet scan produces no sightings.
const HEARTBEAT_TICK: Duration = Duration::from_secs(30);
/// Bound on one reverse name resolution.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a worker needs, handed over at spawn time.
pub struct WorkerContext<B> {
    pub store: JobStore,
    pub backend: B,
    pub known: HashSet<Ipv4Addr>,
    pub record: JobRecord,
    pub log: EventLog,
}

/// Run one discovery job to a terminal state.
///
/// Never returns an error: failures are written to the record and log,
/// which is where every consumer looks.
pub async fn run<B: ScanBackend>(ctx: WorkerContext<B>) {
    let job_id = ctx.record.id;
    let mut worker = Worker {
        store: ctx.store,
        backend: ctx.backend,
        record: ctx.record,
        log: ctx.log,
        results: ResultSet::new(ctx.known),
        enrichment: JoinSet::new(),
        resolving: HashSet::new(),
        cancel: CancellationToken::new(),
    };

    if let Err(e) = worker.run().await {
        let message = e.to_string();
        tracing::error!(job_id = %job_id, error = %message, "Discovery job failed");
        let _ = worker.log.append(EventPayload::Error {
            message: message.clone(),
            fatal: true,
        });
        worker.record.status = JobStatus::Error;
        worker.record.error = Some(message.clone());
        worker.record.finished_at = Some(Utc::now());
        worker.record.touch_heartbeat();
        let _ = worker.store.save(&worker.record);
        let _ = worker.log.append(EventPayload::Status {
            state: JobStatus::Error,
            message,
            current: worker.record.progress.current,
            total: worker.record.progress.total,
        });
    }
}

struct Worker<B> {
    store: JobStore,
    backend: B,
    record: JobRecord,
    log: EventLog,
    results: ResultSet,
    /// In-flight reverse name resolutions, drained between subnets.
    enrichment: JoinSet<Sighting>,
    /// Addresses already handed to the resolver.
    resolving: HashSet<Ipv4Addr>,
    cancel: CancellationToken,
}

impl<B: ScanBackend> Worker<B> {
    async fn run(&mut self) -> Result<()> {
        self.log.append(EventPayload::Status {
            state: JobStatus::Starting,
            message: "discovery starting".to_string(),
            current: 0,
            total: 0,
        })?;

        self.backend.prepare().await?;

        // Custom plans are literal; only automatic scopes need the
        // detected topology.
        let net = match self.record.options.scope {
            lanbeat_core::types::ScanScope::Custom => NetContext::default(),
            _ => NetContext::detect().await,
        };
        let known: Vec<Ipv4Addr> = self.results.known_addresses();
        let subnets = plan::plan(&self.record.options, &net, &known)?;

        self.record.planned_subnets = subnets.iter().map(|s| s.to_string()).collect();
        self.record.progress.total = subnets.len() as u32;
        self.record.status = JobStatus::Running;
        self.checkpoint()?;
        self.log.append(EventPayload::Status {
            state: JobStatus::Running,
            message: format!("scanning {} subnets", subnets.len()),
            current: 0,
            total: subnets.len() as u32,
        })?;

        // Bridge the durable cancel flag to the in-memory token.
        let flag_poller = {
            let store = self.store.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    if store.cancel_requested() {
                        cancel.cancel();
                        return;
                    }
                    tokio::time::sleep(CANCEL_POLL).await;
                }
            })
        };

        let outcome = self.scan_all(&subnets).await;
        flag_poller.abort();

        if outcome? {
            self.finalize_cancelled()
        } else {
            self.drain_enrichment().await?;
            self.finalize_done()
        }
    }

    /// Scan every planned subnet; returns true when cancelled mid-run.
    async fn scan_all(&mut self, subnets: &[ipnet::Ipv4Net]) -> Result<bool> {
        let total = subnets.len() as u32;
        let profile = self.record.options.profile;

        for (index, subnet) in subnets.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(true);
            }

            self.record.progress.current = index as u32 + 1;
            self.record.progress.current_subnet = Some(subnet.to_string());
            self.checkpoint()?;
            self.log.append(EventPayload::Status {
                state: self.record.status,
                message: format!("probing {subnet}"),
                current: index as u32 + 1,
                total,
            })?;

            let scan_result = self.scan_subnet(*subnet, profile).await;
            match scan_result {
                Ok(ScanUnitOutcome::Scanned) => {}
                Ok(ScanUnitOutcome::Skipped { reason }) => {
                    tracing::warn!(subnet = %subnet, reason = %reason, "Subnet skipped");
                    self.log.append(EventPayload::Error {
                        message: reason,
                        fatal: false,
                    })?;
                }
                Err(e @ crate::error::DiscoverError::ToolUnavailable(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(subnet = %subnet, error = %e, "Subnet scan failed, continuing");
                    self.log.append(EventPayload::Error {
                        message: format!("{subnet}: {e}"),
                        fatal: false,
                    })?;
                }
            }

            self.absorb_finished_enrichment()?;

            // Checkpoint the devices accumulated for this subnet.
            self.record.devices = self.results.devices().clone();
            self.checkpoint()?;
        }

        Ok(self.cancel.is_cancelled())
    }

    /// Drive one subnet scan while consuming its sightings as they arrive.
    async fn scan_subnet(
        &mut self,
        subnet: ipnet::Ipv4Net,
        profile: lanbeat_core::types::ScanProfile,
    ) -> Result<ScanUnitOutcome> {
        let (tx, mut rx) = mpsc::channel::<Sighting>(64);
        let backend = self.backend.clone();
        let scan = backend.scan(subnet, profile, self.cancel.clone(), tx);
        tokio::pin!(scan);

        let mut heartbeat = tokio::time::interval(HEARTBEAT_TICK);
        heartbeat.tick().await; // first tick fires immediately

        let mut finished: Option<Result<ScanUnitOutcome>> = None;
        loop {
            tokio::select! {
                result = &mut scan, if finished.is_none() => {
                    finished = Some(result);
                }
                sighting = rx.recv() => {
                    match sighting {
                        Some(sighting) => self.handle_sighting(sighting)?,
                        // The sender lives in the scan future; a closed
                        // channel means the scan is over.
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    self.checkpoint()?;
                }
            }
        }

        match finished {
            Some(result) => result,
            None => scan.await,
        }
    }

    fn handle_sighting(&mut self, mut sighting: Sighting) -> Result<()> {
        if sighting.vendor.is_none() {
            if let Some(mac) = &sighting.mac {
                sighting.vendor = enrich::vendor_for_mac(mac);
            }
        }

        let device = self.results.absorb(&sighting);
        self.record.touch_heartbeat();
        self.log.append(EventPayload::Device { device })?;

        if self.resolving.insert(sighting.address) {
            let address = sighting.address;
            self.enrichment.spawn(async move {
                let hostname = enrich::reverse_lookup(address, RESOLVE_TIMEOUT).await;
                Sighting {
                    hostname,
                    ..Sighting::new(address)
                }
            });
        }
        Ok(())
    }

    /// Fold in resolutions that finished on their own; never waits.
    fn absorb_finished_enrichment(&mut self) -> Result<()> {
        while let Some(joined) = self.enrichment.try_join_next() {
            self.absorb_resolution(joined)?;
        }
        Ok(())
    }

    /// Wait out the remaining resolutions before finishing the job.
    async fn drain_enrichment(&mut self) -> Result<()> {
        while let Some(joined) = self.enrichment.join_next().await {
            self.absorb_resolution(joined)?;
        }
        Ok(())
    }

    fn absorb_resolution(
        &mut self,
        joined: std::result::Result<Sighting, tokio::task::JoinError>,
    ) -> Result<()> {
        let Ok(sighting) = joined else {
            return Ok(());
        };
        if sighting.hostname.is_none() {
            return Ok(());
        }
        let device = self.results.absorb(&sighting);
        self.log.append(EventPayload::Device { device })?;
        Ok(())
    }

    fn finalize_cancelled(&mut self) -> Result<()> {
        self.enrichment.abort_all();
        self.record.devices = self.results.devices().clone();
        self.record.status = JobStatus::Cancelled;
        self.record.finished_at = Some(Utc::now());
        self.checkpoint()?;
        self.log.append(EventPayload::Status {
            state: JobStatus::Cancelled,
            message: "scan cancelled".to_string(),
            current: self.record.progress.current,
            total: self.record.progress.total,
        })?;
        tracing::info!(job_id = %self.record.id, "Discovery job cancelled");
        Ok(())
    }

    fn finalize_done(&mut self) -> Result<()> {
        self.record.devices = self.results.devices().clone();
        self.record.status = JobStatus::Done;
        self.record.finished_at = Some(Utc::now());
        self.record.progress.current = self.record.progress.total;
        self.record.progress.current_subnet = None;
        self.checkpoint()?;
        self.log.append(EventPayload::Status {
            state: JobStatus::Done,
            message: format!("scan complete, {} devices found", self.results.len()),
            current: self.record.progress.total,
            total: self.record.progress.total,
        })?;
        tracing::info!(
            job_id = %self.record.id,
            devices = self.results.len(),
            "Discovery job complete"
        );
        Ok(())
    }

    /// Persist the record with a fresh heartbeat.
    ///
    /// An accepted cancel request must stay visible: once the durable flag
    /// exists, a running record is saved as `cancelling`, never back to
    /// `running`.
    fn checkpoint(&mut self) -> Result<()> {
        if self.record.status == JobStatus::Running && self.store.cancel_requested() {
            self.record.status = JobStatus::Cancelling;
        }
        self.record.touch_heartbeat();
        self.store.save(&self.record)
    }
}
