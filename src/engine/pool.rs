//! Worker pool: a fixed number of workers sharing one batch queue.

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use super::context::{BatchContext, BatchSummary};
use super::worker::Worker;
use crate::client::GenerationClient;
use crate::config::RunnerConfig;
use crate::error::{Error, Result};

/// A running pool. Dropping it does not stop the workers; they drain the
/// queue regardless.
pub struct WorkerPool {
    ctx: Arc<BatchContext>,
    supervisor: JoinHandle<BatchSummary>,
}

impl WorkerPool {
    /// Spawn up to `config.pool_size` workers (never more than there are items)
    /// under a supervisor task, with `start_stagger_ms` between consecutive
    /// starts. Returns without waiting for any worker to start.
    pub fn start(
        ctx: Arc<BatchContext>,
        client: Arc<dyn GenerationClient>,
        config: Arc<RunnerConfig>,
    ) -> Self {
        let size = config.pool_size.min(ctx.total).max(1);
        let supervisor = tokio::spawn(supervise(Arc::clone(&ctx), client, config, size));
        Self { ctx, supervisor }
    }

    pub fn context(&self) -> &Arc<BatchContext> {
        &self.ctx
    }

    pub fn live_workers(&self) -> usize {
        self.ctx.live_workers()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) -> Result<BatchSummary> {
        self.supervisor
            .await
            .map_err(|e| Error::Other(format!("pool supervisor failed: {e}")))
    }
}

async fn supervise(
    ctx: Arc<BatchContext>,
    client: Arc<dyn GenerationClient>,
    config: Arc<RunnerConfig>,
    size: usize,
) -> BatchSummary {
    let stagger = config.start_stagger();
    let mut workers = JoinSet::new();

    for id in 0..size {
        if id > 0 && !stagger.is_zero() {
            tokio::time::sleep(stagger).await;
        }
        let worker = Worker::new(
            id,
            Arc::clone(&ctx),
            Arc::clone(&client),
            Arc::clone(&config),
        );
        workers.spawn(worker.run());
    }
    debug!(run = %ctx.run_name, size, "all workers spawned");

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(report) => debug!(?report, "worker joined"),
            Err(e) => error!(run = %ctx.run_name, error = %e, "worker task aborted"),
        }
    }

    if let Err(e) = ctx.writer.flush().await {
        error!(run = %ctx.run_name, error = %e, "failed to flush results file");
    }
    ctx.mark_finished();

    let summary = ctx.summary();
    info!(
        run = %summary.run_name,
        total = summary.total,
        completed = summary.completed,
        failed = summary.failed,
        artifacts = summary.artifacts,
        download_failures = summary.download_failures,
        elapsed_ms = summary.elapsed_ms,
        "batch finished"
    );
    summary
}
