//! Batch controller: accepts batches, owns the running one, rejects overlap.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::context::{BatchContext, BatchStatus, BatchSummary};
use super::pool::WorkerPool;
use crate::client::GenerationClient;
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::input::parse_batch;
use crate::model::{Variant, WorkItem};
use crate::output::{allocate_run_dir, results_path, validate_run_name};
use crate::queue::WorkQueue;
use crate::telemetry::metrics;
use crate::writer::ResultWriter;

/// A batch as handed to [`BatchController::submit`].
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub csv_text: String,
    pub run_name: String,
    pub variant: Variant,
}

/// Returned once a batch has been accepted and its workers are starting.
#[derive(Debug, Clone, Serialize)]
pub struct BatchTicket {
    pub id: Uuid,
    pub run_name: String,
    pub output_dir: String,
    pub results_file: String,
    pub total: usize,
}

struct ActiveBatch {
    ctx: Arc<BatchContext>,
    pool: Option<WorkerPool>,
}

#[derive(Default)]
struct Slot {
    /// Run name of a batch that passed the overlap check but is still
    /// opening its output files.
    starting: Option<String>,
    current: Option<ActiveBatch>,
}

/// Holds at most one batch at a time. A new batch is accepted only once
/// every worker of the previous one has exited.
pub struct BatchController {
    client: Arc<dyn GenerationClient>,
    config: Arc<RunnerConfig>,
    output_root: PathBuf,
    slot: Mutex<Slot>,
}

impl BatchController {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        config: RunnerConfig,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            config: Arc::new(config),
            output_root: output_root.into(),
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Validate and enqueue a batch, then start its worker pool.
    ///
    /// Returns as soon as the workers are spawned; use [`Self::wait`] to
    /// block until the batch drains.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a bad run name or CSV, `BatchInProgress` while a
    /// previous batch still has live workers, plus any I/O error from
    /// preparing the output files. Nothing is written on rejection.
    pub async fn submit(&self, request: BatchRequest) -> Result<BatchTicket> {
        let BatchRequest {
            csv_text,
            run_name,
            variant,
        } = request;

        validate_run_name(&run_name)?;
        if variant == Variant::Custom && !self.config.supports_custom_lyrics {
            return Err(Error::InvalidInput(
                "custom lyrics are not supported by the configured upstream".to_string(),
            ));
        }
        let items = parse_batch(&csv_text, variant)?;

        self.reserve(&run_name)?;
        let started = self.start(run_name, variant, items).await;

        let mut slot = self.slot.lock();
        slot.starting = None;
        let (ctx, pool) = started?;
        let ticket = BatchTicket {
            id: ctx.id,
            run_name: ctx.run_name.clone(),
            output_dir: ctx.output_dir.display().to_string(),
            results_file: ctx.results_file().display().to_string(),
            total: ctx.total,
        };
        slot.current = Some(ActiveBatch {
            ctx,
            pool: Some(pool),
        });
        Ok(ticket)
    }

    fn reserve(&self, run_name: &str) -> Result<()> {
        let mut slot = self.slot.lock();
        if let Some(starting) = &slot.starting {
            return Err(Error::BatchInProgress {
                run_name: starting.clone(),
                pending: 0,
            });
        }
        if let Some(active) = &slot.current {
            if !active.ctx.is_finished() {
                warn!(
                    run = %active.ctx.run_name,
                    rejected = %run_name,
                    "batch rejected, previous batch still running"
                );
                return Err(Error::BatchInProgress {
                    run_name: active.ctx.run_name.clone(),
                    pending: active.ctx.queue.len(),
                });
            }
        }
        slot.starting = Some(run_name.to_string());
        Ok(())
    }

    async fn start(
        &self,
        run_name: String,
        variant: Variant,
        items: Vec<WorkItem>,
    ) -> Result<(Arc<BatchContext>, WorkerPool)> {
        let results = results_path(&self.output_root, &run_name);
        tokio::fs::create_dir_all(&self.output_root).await?;
        ResultWriter::check_append(&results, self.config.append_results).await?;
        // The results file is truncated only once the run directory exists.
        let output_dir = allocate_run_dir(&self.output_root, &run_name).await?;
        let writer = match ResultWriter::open(&results, self.config.append_results).await {
            Ok(writer) => writer,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir(&output_dir).await {
                    warn!(dir = %output_dir.display(), error = %cleanup, "run dir not removed");
                }
                return Err(e);
            }
        };

        let queue = WorkQueue::seeded(self.config.queue_order, items);
        let ctx = Arc::new(BatchContext::new(
            run_name, variant, output_dir, queue, writer,
        ));

        info!(
            batch_id = %ctx.id,
            run = %ctx.run_name,
            variant = %variant,
            items = ctx.total,
            output_dir = %ctx.output_dir.display(),
            "batch accepted"
        );
        metrics::batches_started().add(1, &[KeyValue::new("variant", variant.to_string())]);

        let pool = WorkerPool::start(
            Arc::clone(&ctx),
            Arc::clone(&self.client),
            Arc::clone(&self.config),
        );
        Ok((ctx, pool))
    }

    /// Status of the current (or most recent) batch.
    pub fn status(&self) -> Option<BatchStatus> {
        self.slot.lock().current.as_ref().map(|a| a.ctx.status())
    }

    /// True while a batch is starting or still has live workers.
    pub fn is_busy(&self) -> bool {
        let slot = self.slot.lock();
        slot.starting.is_some()
            || slot
                .current
                .as_ref()
                .is_some_and(|active| !active.ctx.is_finished())
    }

    /// Wait for the current batch to finish.
    ///
    /// Returns `None` if there is no batch, or if another caller is already
    /// waiting on it.
    pub async fn wait(&self) -> Option<Result<BatchSummary>> {
        let pool = {
            let mut slot = self.slot.lock();
            slot.current.as_mut()?.pool.take()?
        };
        Some(pool.join().await)
    }
}
