//! One-off generations outside of any batch.
//!
//! At most `max_direct_generations` run at once; a request beyond that is
//! turned away rather than queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use opentelemetry::KeyValue;
use serde_json::Value;
use tracing::{Instrument, info};

use crate::client::{GenerationClient, SubmitRequest};
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::model::{JobHandle, Payload};
use crate::telemetry::{genai, metrics};

/// A single prompt-driven generation.
#[derive(Debug, Clone)]
pub struct DirectRequest {
    pub prompt: String,
    pub make_instrumental: bool,
    /// Falls back to the configured default model when unset or blank.
    pub model: Option<String>,
}

pub struct DirectGenerator {
    client: Arc<dyn GenerationClient>,
    default_model: String,
    active: AtomicUsize,
    max_active: usize,
}

/// Releases a generation slot on drop.
struct ActiveSlot<'a>(&'a AtomicUsize);

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl DirectGenerator {
    pub fn new(client: Arc<dyn GenerationClient>, config: &RunnerConfig) -> Self {
        Self {
            client,
            default_model: config.default_model.clone(),
            active: AtomicUsize::new(0),
            max_active: config.max_direct_generations,
        }
    }

    /// Generations currently in flight.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Submit one generation and wait for the upstream to finish it.
    ///
    /// Returns `Ok(None)` without calling the upstream when the limit of
    /// concurrent generations is reached.
    pub async fn generate(&self, request: DirectRequest) -> Result<Option<Vec<JobHandle>>> {
        if request.prompt.trim().is_empty() {
            return Err(Error::InvalidInput("prompt is required".to_string()));
        }
        let Some(_slot) = self.try_acquire() else {
            info!(max = self.max_active, "direct generation turned away, all slots busy");
            return Ok(None);
        };

        let model = request
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.default_model);
        let payload = Payload::Prompt {
            prompt: request.prompt.clone(),
        };
        let span = genai::start_generation_span(model, "direct");
        let submitted = self
            .client
            .submit(SubmitRequest {
                payload: &payload,
                title: "",
                make_instrumental: request.make_instrumental,
                model,
                wait_audio: true,
            })
            .instrument(span.clone())
            .await;

        let handles = match submitted {
            Ok(handles) => handles,
            Err(e) => {
                metrics::submissions().add(1, &[KeyValue::new("result", "direct_failed")]);
                return Err(e.into());
            }
        };
        genai::record_job_count(&span, handles.len());
        metrics::submissions().add(1, &[KeyValue::new("result", "direct")]);
        Ok(Some(handles))
    }

    /// Look up the WAV rendition of a finished clip.
    pub async fn get_wav(&self, clip_id: &str) -> Result<Value> {
        if clip_id.trim().is_empty() {
            return Err(Error::InvalidInput("clip_id is required".to_string()));
        }
        Ok(self.client.get_wav(clip_id).await?)
    }

    fn try_acquire(&self) -> Option<ActiveSlot<'_>> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_active).then_some(n + 1)
            })
            .ok()
            .map(|_| ActiveSlot(&self.active))
    }
}
