//! The archival pipeline: a bounded buffer between ingest and a pluggable
//! archiver.
//!
//! The flusher runs on a dedicated `std::thread`, not a tokio task, so that
//! a slow or blocking archiver (e.g. a SQL insert) never stalls the async
//! runtime driving RPC handling.

mod app_log;
mod null;
mod sql;

pub use app_log::AppLogArchiver;
pub use null::NullArchiver;
pub use sql::SqlArchiver;

use crate::fixcache::ArchiveSink;
use geotracker_types::archive::ArchivalRecord;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Outcome of handing a batch to an archiver implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Ok,
    Retryable,
    Fatal,
}

/// Capability every archiver backend implements.
pub trait Archiver: Send {
    fn archive(&mut self, batch: &[ArchivalRecord]) -> ArchiveOutcome;
}

#[derive(Debug, Default)]
pub struct ArchiverStats {
    pub shed: AtomicU64,
    pub flushed_batches: AtomicU64,
    pub flushed_records: AtomicU64,
    pub discarded_batches: AtomicU64,
}

/// The bounded FIFO plus background flusher. Implements [`ArchiveSink`] so a
/// `FixCache` can hold it as its injected archive target.
///
/// `tx` is the *only* producer handle kept alive once the pipeline is
/// running; it lives behind a mutex so `stop()` can actually take and drop
/// it. That drop is what makes the flusher's blocking `rx.recv_timeout`
/// return `Disconnected` immediately instead of waiting out the rest of
/// `buffer_interval` before it ever looks at the `stop` flag.
pub struct ArchiverPipeline {
    tx: parking_lot::Mutex<Option<SyncSender<ArchivalRecord>>>,
    stats: Arc<ArchiverStats>,
    stop: Arc<AtomicBool>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutdown_drain_deadline: Duration,
    spill_file_path: Option<PathBuf>,
    in_flight: Arc<parking_lot::Mutex<Vec<ArchivalRecord>>>,
}

impl ArchiveSink for ArchiverPipeline {
    fn submit(&self, record: ArchivalRecord) {
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) => match tx.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.stats.shed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("archiver buffer full, shedding record");
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::error!("archiver flusher thread is gone, dropping record");
                }
            },
            None => {
                tracing::error!("archiver pipeline is stopped, dropping record");
            }
        }
    }
}

impl ArchiverPipeline {
    pub fn start(
        mut archiver: Box<dyn Archiver>,
        buffer_size: usize,
        buffer_interval: Duration,
        retry_interval: Duration,
        max_retries: u32,
        shutdown_drain_deadline: Duration,
        spill_file_path: Option<PathBuf>,
    ) -> Arc<Self> {
        let (tx, rx) = sync_channel(buffer_size.max(1));
        let stats = Arc::new(ArchiverStats::default());
        let stop = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let flusher_stats = Arc::clone(&stats);
        let flusher_stop = Arc::clone(&stop);
        let flusher_in_flight = Arc::clone(&in_flight);
        let handle = std::thread::spawn(move || {
            run_flusher(
                rx,
                archiver.as_mut(),
                buffer_interval,
                retry_interval,
                max_retries,
                flusher_stats,
                flusher_stop,
                flusher_in_flight,
            );
        });

        Arc::new(Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            stats,
            stop,
            handle: parking_lot::Mutex::new(Some(handle)),
            shutdown_drain_deadline,
            spill_file_path,
            in_flight,
        })
    }

    pub fn stats(&self) -> &ArchiverStats {
        &self.stats
    }

    /// Forces a final synchronous flush with a bounded wait. Any records
    /// still buffered after `shutdown_drain_deadline` are written to the
    /// crash-recovery spill file (one pipe-delimited record per line,
    /// grounded on `cold_state.rs`'s `TrajectoryLog` text format) to be
    /// replayed on restart.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        // Drop the one producer handle so the flusher's blocking
        // `rx.recv_timeout` wakes immediately with `Disconnected` rather than
        // waiting out whatever remains of `buffer_interval`.
        self.tx.lock().take();

        let deadline = Instant::now() + self.shutdown_drain_deadline;
        if let Some(handle) = self.handle.lock().take() {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("archiver flusher did not drain within the shutdown deadline");
                let stranded = std::mem::take(&mut *self.in_flight.lock());
                if !stranded.is_empty() {
                    if let Some(path) = &self.spill_file_path {
                        if let Err(err) = spill_to_disk(path, &stranded) {
                            tracing::error!("failed to spill {} undrained records to {:?}: {}", stranded.len(), path, err);
                        }
                    } else {
                        tracing::error!("{} records undrained at shutdown with no spill file configured", stranded.len());
                    }
                }
            }
        }
    }
}

fn run_flusher(
    rx: Receiver<ArchivalRecord>,
    archiver: &mut dyn Archiver,
    buffer_interval: Duration,
    retry_interval: Duration,
    max_retries: u32,
    stats: Arc<ArchiverStats>,
    stop: Arc<AtomicBool>,
    in_flight: Arc<parking_lot::Mutex<Vec<ArchivalRecord>>>,
) {
    let mut pending: Vec<ArchivalRecord> = Vec::new();
    let mut oldest_enqueued_at: Option<Instant> = None;

    loop {
        let timeout = match oldest_enqueued_at {
            Some(enqueued) => buffer_interval.saturating_sub(enqueued.elapsed()),
            None => buffer_interval,
        };

        match rx.recv_timeout(timeout) {
            Ok(record) => {
                if pending.is_empty() {
                    oldest_enqueued_at = Some(Instant::now());
                }
                pending.push(record);
                *in_flight.lock() = pending.clone();
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                if !pending.is_empty() {
                    flush_with_retry(archiver, &mut pending, retry_interval, max_retries, &stats, &in_flight);
                }
                return;
            }
        }

        let should_flush_by_time = oldest_enqueued_at
            .map(|t| t.elapsed() >= buffer_interval)
            .unwrap_or(false);
        if !pending.is_empty() && should_flush_by_time {
            flush_with_retry(archiver, &mut pending, retry_interval, max_retries, &stats, &in_flight);
            oldest_enqueued_at = None;
        }

        if stop.load(Ordering::Relaxed) {
            // Drain whatever else has queued up before exiting.
            while let Ok(record) = rx.try_recv() {
                pending.push(record);
            }
            *in_flight.lock() = pending.clone();
            if !pending.is_empty() {
                flush_with_retry(archiver, &mut pending, retry_interval, max_retries, &stats, &in_flight);
            }
            return;
        }
    }
}

fn flush_with_retry(
    archiver: &mut dyn Archiver,
    pending: &mut Vec<ArchivalRecord>,
    retry_interval: Duration,
    max_retries: u32,
    stats: &ArchiverStats,
    in_flight: &parking_lot::Mutex<Vec<ArchivalRecord>>,
) {
    let batch = std::mem::take(pending);
    let mut attempt = 0;
    let mut batch = batch;
    loop {
        match archiver.archive(&batch) {
            ArchiveOutcome::Ok => {
                stats.flushed_batches.fetch_add(1, Ordering::Relaxed);
                stats.flushed_records.fetch_add(batch.len() as u64, Ordering::Relaxed);
                in_flight.lock().clear();
                return;
            }
            ArchiveOutcome::Retryable => {
                attempt += 1;
                if attempt > max_retries {
                    tracing::error!("archiver exhausted retries, discarding batch of {}", batch.len());
                    stats.discarded_batches.fetch_add(1, Ordering::Relaxed);
                    in_flight.lock().clear();
                    return;
                }
                std::thread::sleep(retry_interval);
            }
            ArchiveOutcome::Fatal => {
                tracing::error!("archiver fatal error, discarding batch of {}", batch.len());
                stats.discarded_batches.fetch_add(1, Ordering::Relaxed);
                in_flight.lock().clear();
                return;
            }
        }
    }
}

/// Writes buffered records still pending at shutdown to the spill file, one
/// pipe-delimited line each: `entityId|groupId|timeUtcNanos|lat|lon`.
pub fn spill_to_disk(path: &std::path::Path, records: &[ArchivalRecord]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    for record in records {
        let nanos = record
            .fix
            .time_utc
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        writeln!(
            file,
            "{}|{}|{}|{}|{}",
            record.entity_id,
            record.group_id.as_ref().map(|g| g.as_str()).unwrap_or(""),
            nanos,
            record.fix.latitude,
            record.fix.longitude,
        )?;
    }
    file.flush()
}
