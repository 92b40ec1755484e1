//! Worker: drains the batch queue one item at a time.
//!
//! Per item the worker moves through
//! `Fetching → Submitting → Polling → Downloading → Recording` and back to
//! `Idle`, exiting once it finds the queue empty. A failed submission puts the
//! item back on the queue, not due again until its backoff has passed;
//! failures after that point are logged to the batch error log and never
//! requeue the item.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use opentelemetry::KeyValue;
use tokio::io::AsyncWriteExt;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::context::BatchContext;
use crate::client::{GenerationClient, SubmitRequest};
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::model::{JobHandle, JobStatus, ResultRow, WorkItem};
use crate::output::artifact_file_name;
use crate::queue::{Next, QueuedItem};
use crate::telemetry::{genai, metrics, work};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Submitting,
    Polling,
    Downloading,
    Recording,
    Exited,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Fetching => "fetching",
            WorkerState::Submitting => "submitting",
            WorkerState::Polling => "polling",
            WorkerState::Downloading => "downloading",
            WorkerState::Recording => "recording",
            WorkerState::Exited => "exited",
        };
        write!(f, "{s}")
    }
}

/// What became of one popped item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Generation finished; `artifacts` rows were recorded.
    Completed { artifacts: usize },
    /// Submission failed and the item went back on the queue.
    Requeued,
    /// Given up on. The reason is in the batch error log.
    Failed { reason: String },
}

/// Per-worker tally, returned when the worker exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub completed: usize,
    pub requeued: usize,
    pub failed: usize,
}

pub struct Worker {
    id: usize,
    ctx: Arc<BatchContext>,
    client: Arc<dyn GenerationClient>,
    config: Arc<RunnerConfig>,
    state: WorkerState,
    span: Span,
}

/// Keeps the batch live-worker count right even if the worker task panics.
struct LiveGuard<'a>(&'a BatchContext);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.worker_exited();
    }
}

impl Worker {
    pub fn new(
        id: usize,
        ctx: Arc<BatchContext>,
        client: Arc<dyn GenerationClient>,
        config: Arc<RunnerConfig>,
    ) -> Self {
        Self {
            id,
            ctx,
            client,
            config,
            state: WorkerState::Idle,
            span: Span::none(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, to: WorkerState) {
        work::record_state_transition(&self.span, &self.state.to_string(), &to.to_string());
        self.state = to;
    }

    /// Run until the queue is empty.
    pub async fn run(mut self) -> WorkerReport {
        let ctx = Arc::clone(&self.ctx);
        let live = ctx.worker_started();
        let _live = LiveGuard(&ctx);
        info!(worker = self.id, run = %ctx.run_name, live, "worker started");

        let mut report = WorkerReport {
            worker_id: self.id,
            ..Default::default()
        };

        loop {
            self.transition(WorkerState::Fetching);
            tokio::task::yield_now().await;

            let queued = match ctx.queue.take() {
                Next::Ready(queued) => queued,
                Next::Wait(until) => {
                    tokio::time::sleep_until(until).await;
                    continue;
                }
                Next::Drained => {
                    self.transition(WorkerState::Exited);
                    break;
                }
            };

            self.span =
                work::start_item_span(self.id, &queued.item.identifier, queued.attempts + 1);
            let span = self.span.clone();
            let outcome = self.process(queued).instrument(span).await;

            match outcome {
                ItemOutcome::Completed { .. } => {
                    report.completed += 1;
                    ctx.record_completed();
                    metrics::items_finished().add(1, &[KeyValue::new("result", "completed")]);
                }
                ItemOutcome::Requeued => report.requeued += 1,
                ItemOutcome::Failed { .. } => {
                    report.failed += 1;
                    ctx.record_failed();
                    metrics::items_finished().add(1, &[KeyValue::new("result", "failed")]);
                }
            }

            self.transition(WorkerState::Idle);
            self.span = Span::none();
        }

        info!(
            worker = self.id,
            completed = report.completed,
            requeued = report.requeued,
            failed = report.failed,
            remaining = ctx.live_workers().saturating_sub(1),
            "worker exited"
        );
        report
    }

    /// Drive one popped item through submit → poll → download → record.
    pub async fn process(&mut self, mut queued: QueuedItem) -> ItemOutcome {
        self.transition(WorkerState::Submitting);
        queued.attempts += 1;

        let submitted = self.submit(&queued.item).await;
        let handles = match submitted {
            Ok(handles) => handles,
            Err(e) => return self.handle_submit_failure(queued, e).await,
        };
        metrics::submissions().add(1, &[KeyValue::new("result", "ok")]);
        work::record_artifact_count(&self.span, handles.len());

        let item = queued.item;

        self.transition(WorkerState::Polling);
        let polling_started = Instant::now();
        let handles = match self.poll_until_terminal(handles).await {
            Ok(handles) => handles,
            Err(reason) => {
                warn!(item = %item.identifier, %reason, "giving up on item while polling");
                self.log_failure(&item.identifier, &reason).await;
                return ItemOutcome::Failed { reason };
            }
        };
        metrics::generation_duration_ms().record(
            polling_started.elapsed().as_millis() as f64,
            &[KeyValue::new("model", self.model_for(&item).to_string())],
        );

        let base = self.config.artifact_index_base.for_variant(self.ctx.variant);
        let mut recorded = 0;
        for (offset, handle) in handles.iter().enumerate() {
            let artifact_index = base + offset as u32;
            if self.download_and_record(&item, handle, artifact_index).await {
                recorded += 1;
            }
        }

        info!(
            worker = self.id,
            item = %item.identifier,
            artifacts = recorded,
            of = handles.len(),
            "item done"
        );
        ItemOutcome::Completed {
            artifacts: recorded,
        }
    }

    fn model_for<'a>(&'a self, item: &'a WorkItem) -> &'a str {
        item.model.as_deref().unwrap_or(&self.config.default_model)
    }

    async fn submit(&self, item: &WorkItem) -> Result<Vec<JobHandle>> {
        let model = self.model_for(item);
        let span = genai::start_generation_span(model, &self.ctx.variant.to_string());
        let request = SubmitRequest {
            payload: &item.payload,
            title: &item.identifier,
            make_instrumental: item.make_instrumental,
            model,
            wait_audio: self.config.wait_audio,
        };

        let handles = self.client.submit(request).instrument(span.clone()).await?;
        genai::record_job_count(&span, handles.len());
        if handles.is_empty() {
            return Err(Error::Other("upstream accepted the request but returned no jobs".into()));
        }
        Ok(handles)
    }

    async fn handle_submit_failure(&self, mut queued: QueuedItem, error: Error) -> ItemOutcome {
        let identifier = queued.item.identifier.clone();
        let attempts = queued.attempts;

        if self.config.submit_attempts_exhausted(attempts) {
            let reason = format!("submission failed after {attempts} attempt(s): {error}");
            error!(worker = self.id, item = %identifier, %reason, "dropping item");
            metrics::submissions().add(1, &[KeyValue::new("result", "dropped")]);
            self.log_failure(&identifier, &reason).await;
            return ItemOutcome::Failed { reason };
        }

        let backoff = self.config.submit_backoff(attempts);
        warn!(
            worker = self.id,
            item = %identifier,
            attempt = attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "submission failed, requeueing"
        );
        metrics::submissions().add(1, &[KeyValue::new("result", "requeued")]);
        queued.not_before = Some(tokio::time::Instant::now() + backoff);
        self.ctx.queue.push_back(queued);
        ItemOutcome::Requeued
    }

    /// Poll until every job is `complete` or `error`.
    ///
    /// Only unfinished jobs are asked about; answers are merged back by id so
    /// the artifact order from the submission is kept.
    async fn poll_until_terminal(
        &self,
        mut handles: Vec<JobHandle>,
    ) -> std::result::Result<Vec<JobHandle>, String> {
        let started = Instant::now();
        let interval = self.config.poll_interval();
        let timeout = self.config.poll_timeout();
        let mut consecutive_failures = 0u32;

        loop {
            if handles.iter().all(|h| h.status.is_terminal()) {
                return Ok(handles);
            }
            if let Some(timeout) = timeout {
                if started.elapsed() >= timeout {
                    return Err(format!(
                        "jobs still unfinished after {}s",
                        timeout.as_secs()
                    ));
                }
            }

            if interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(interval).await;
            }

            let pending: Vec<String> = handles
                .iter()
                .filter(|h| !h.status.is_terminal())
                .map(|h| h.id.clone())
                .collect();

            let span = genai::start_poll_span(pending.len());
            match self.client.poll(&pending).instrument(span).await {
                Ok(fresh) => {
                    consecutive_failures = 0;
                    merge_handles(&mut handles, fresh);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    debug!(failures = consecutive_failures, error = %e, "poll failed");
                    if self.config.poll_failures_exhausted(consecutive_failures) {
                        return Err(format!(
                            "status poll failed {consecutive_failures} time(s) in a row: {e}"
                        ));
                    }
                }
            }
        }
    }

    /// Download one artifact and record its row. Returns whether a row was written.
    async fn download_and_record(
        &mut self,
        item: &WorkItem,
        handle: &JobHandle,
        artifact_index: u32,
    ) -> bool {
        self.transition(WorkerState::Downloading);
        let file_name = match self.download(handle, &item.identifier, artifact_index).await {
            Ok(file_name) => file_name,
            Err(e) => {
                warn!(item = %item.identifier, job = %handle.id, error = %e, "download failed");
                self.ctx.record_download_failure();
                metrics::artifacts().add(1, &[KeyValue::new("result", "failed")]);
                self.log_failure(&item.identifier, &e.to_string()).await;
                return false;
            }
        };
        metrics::artifacts().add(1, &[KeyValue::new("result", "downloaded")]);

        self.transition(WorkerState::Recording);
        let row = ResultRow {
            index: item.identifier.clone(),
            cnt: artifact_index,
            title: handle.title.clone().unwrap_or_default(),
            file_name,
            lyrics: handle.lyric.clone().unwrap_or_default(),
        };
        match self.ctx.writer.write_record(&row.to_record()).await {
            Ok(()) => {
                self.ctx.record_artifact();
                debug!(item = %item.identifier, cnt = artifact_index, "row recorded");
                true
            }
            Err(e) => {
                error!(item = %item.identifier, error = %e, "failed to record result row");
                self.log_failure(&item.identifier, &format!("recording row failed: {e}"))
                    .await;
                false
            }
        }
    }

    /// Stream one artifact into the batch directory. Returns the file name.
    async fn download(
        &self,
        handle: &JobHandle,
        identifier: &str,
        artifact_index: u32,
    ) -> Result<String> {
        if handle.status == JobStatus::Error {
            return Err(Error::Other(format!("job {} failed upstream", handle.id)));
        }
        let url = handle
            .audio_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Other(format!("job {} has no audio_url", handle.id)))?;

        let file_name = artifact_file_name(identifier, artifact_index, url);
        let path = self.ctx.output_dir.join(&file_name);

        if let Err(e) = self.stream_to_file(url, &path).await {
            // Drop the partial file.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
        Ok(file_name)
    }

    async fn stream_to_file(&self, url: &str, path: &Path) -> Result<()> {
        let mut stream = self.client.download(url).await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(path = %path.display(), bytes = written, "artifact saved");
        Ok(())
    }

    async fn log_failure(&self, identifier: &str, reason: &str) {
        if let Err(e) = self.ctx.error_log.append(identifier, reason).await {
            error!(
                item = %identifier,
                path = %self.ctx.error_log.path().display(),
                error = %e,
                "could not write to download error log"
            );
        }
    }
}

/// Replace handles with fresher copies of the same id; unknown ids are ignored.
fn merge_handles(handles: &mut [JobHandle], fresh: Vec<JobHandle>) {
    for update in fresh {
        if let Some(slot) = handles.iter_mut().find(|h| h.id == update.id) {
            *slot = update;
        }
    }
}
