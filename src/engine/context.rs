//! Per-batch shared state.
//!
//! One `BatchContext` exists per accepted batch. It is owned by the
//! controller and handed to every worker behind an `Arc`; nothing about a
//! batch lives in process-wide globals.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::Variant;
use crate::output::ErrorLog;
use crate::queue::WorkQueue;
use crate::writer::ResultWriter;

pub struct BatchContext {
    pub id: Uuid,
    pub run_name: String,
    pub variant: Variant,
    pub output_dir: PathBuf,
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub queue: WorkQueue,
    pub writer: ResultWriter,
    pub error_log: ErrorLog,
    started: Instant,
    counters: Counters,
    finished: AtomicBool,
}

#[derive(Default)]
struct Counters {
    live_workers: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    artifacts: AtomicUsize,
    download_failures: AtomicUsize,
}

/// Point-in-time view of a batch, served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub id: Uuid,
    pub run_name: String,
    pub variant: Variant,
    pub output_dir: String,
    pub results_file: String,
    pub total: usize,
    pub pending: usize,
    pub live_workers: usize,
    pub completed: usize,
    pub failed: usize,
    pub artifacts: usize,
    pub download_failures: usize,
    pub finished: bool,
    pub started_at: DateTime<Utc>,
}

/// Final tally once every worker has exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub run_name: String,
    pub output_dir: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub artifacts: usize,
    pub download_failures: usize,
    pub elapsed_ms: u64,
}

impl BatchContext {
    pub fn new(
        run_name: String,
        variant: Variant,
        output_dir: PathBuf,
        queue: WorkQueue,
        writer: ResultWriter,
    ) -> Self {
        let error_log = ErrorLog::new(&output_dir);
        Self {
            id: Uuid::new_v4(),
            run_name,
            variant,
            total: queue.len(),
            output_dir,
            started_at: Utc::now(),
            queue,
            writer,
            error_log,
            started: Instant::now(),
            counters: Counters::default(),
            finished: AtomicBool::new(false),
        }
    }

    pub fn results_file(&self) -> &Path {
        self.writer.path()
    }

    /// Returns the live count after the increment.
    pub fn worker_started(&self) -> usize {
        self.counters.live_workers.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the live count after the decrement.
    pub fn worker_exited(&self) -> usize {
        self.counters.live_workers.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn live_workers(&self) -> usize {
        self.counters.live_workers.load(Ordering::SeqCst)
    }

    pub fn record_completed(&self) {
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_artifact(&self) {
        self.counters.artifacts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download_failure(&self) {
        self.counters.download_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    /// True once the pool supervisor has seen every worker exit.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> BatchStatus {
        BatchStatus {
            id: self.id,
            run_name: self.run_name.clone(),
            variant: self.variant,
            output_dir: self.output_dir.display().to_string(),
            results_file: self.results_file().display().to_string(),
            total: self.total,
            pending: self.queue.len(),
            live_workers: self.live_workers(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            artifacts: self.counters.artifacts.load(Ordering::Relaxed),
            download_failures: self.counters.download_failures.load(Ordering::Relaxed),
            finished: self.is_finished(),
            started_at: self.started_at,
        }
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            run_name: self.run_name.clone(),
            output_dir: self.output_dir.display().to_string(),
            total: self.total,
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            artifacts: self.counters.artifacts.load(Ordering::Relaxed),
            download_failures: self.counters.download_failures.load(Ordering::Relaxed),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
