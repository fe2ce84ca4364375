//! Append-only event log with a resumable live stream.
//!
//! One JSONL file per job, truncated only when the next job starts. The
//! active worker is the single writer; any process may read. Sequence ids
//! are assigned at append time and are strictly increasing, so a subscriber
//! can disconnect and resume exactly where it left off.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use lanbeat_core::events::{EventPayload, ScanEvent};

use crate::error::Result;

/// Single-writer handle for appending events.
pub struct EventLog {
    file: File,
    seq: u64,
}

impl EventLog {
    /// Truncate the log and start a fresh sequence. Called once per job.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file, seq: 0 })
    }

    /// Re-open an existing log for appending, continuing its sequence.
    pub fn resume(path: &Path) -> Result<Self> {
        let seq = read_events(path, 0)?.last().map(|e| e.seq).unwrap_or(0);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file, seq })
    }

    /// Append one event. The line is written and flushed before the event
    /// is returned to the caller.
    pub fn append(&mut self, payload: EventPayload) -> Result<ScanEvent> {
        self.seq += 1;
        let event = ScanEvent::new(self.seq, payload);
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(event)
    }

    pub fn last_seq(&self) -> u64 {
        self.seq
    }
}

/// Read all events with `seq > from_seq`, in file order.
///
/// A trailing line that does not parse is tolerated: the single writer may
/// be mid-append. A missing file is an empty log.
pub fn read_events(path: &Path, from_seq: u64) -> Result<Vec<ScanEvent>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ScanEvent>(&line) {
            Ok(event) if event.seq > from_seq => out.push(event),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Skipping unparseable log line"),
        }
    }
    Ok(out)
}

/// One item from a live subscription.
#[derive(Debug)]
pub enum StreamItem {
    Event(ScanEvent),
    /// Liveness ping emitted when no events arrive for a while, so
    /// intermediary proxies do not drop an idle connection.
    Ping,
}

/// Live, resumable tail of the event log.
///
/// Replays everything after `from_seq`, then follows the file with
/// bounded-latency polling. Ends after delivering a terminal status event.
pub struct EventStream {
    path: PathBuf,
    last_seq: u64,
    pending: std::collections::VecDeque<ScanEvent>,
    poll: Duration,
    ping: Duration,
    last_item: Instant,
    done: bool,
}

impl EventStream {
    pub fn subscribe(path: &Path, from_seq: u64, poll: Duration, ping: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            last_seq: from_seq,
            pending: std::collections::VecDeque::new(),
            poll,
            ping,
            last_item: Instant::now(),
            done: false,
        }
    }

    /// Next stream item; `None` once the job's terminal event has been
    /// delivered.
    pub async fn next(&mut self) -> Result<Option<StreamItem>> {
        loop {
            if self.done && self.pending.is_empty() {
                return Ok(None);
            }

            if let Some(event) = self.pending.pop_front() {
                self.last_seq = event.seq;
                self.last_item = Instant::now();
                if event.is_terminal() {
                    self.done = true;
                }
                return Ok(Some(StreamItem::Event(event)));
            }

            let fresh = read_events(&self.path, self.last_seq)?;
            if !fresh.is_empty() {
                self.pending.extend(fresh);
                continue;
            }

            if self.last_item.elapsed() >= self.ping {
                self.last_item = Instant::now();
                return Ok(Some(StreamItem::Ping));
            }

            tokio::time::sleep(self.poll).await;
        }
    }
}
