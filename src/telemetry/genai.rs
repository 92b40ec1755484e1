//! GenAI semantic convention span helpers for upstream generation calls.
//!
//! Uses the OpenTelemetry GenAI attribute names:
//! - `gen_ai.operation.name`
//! - `gen_ai.request.model`
//! - `gen_ai.provider.name`

use tracing::Span;

/// Start a span for a generation submit. `variant` is the input schema
/// ("prompt" or "custom"); the returned job count is filled in later via
/// [`record_job_count`].
pub fn start_generation_span(model: &str, variant: &str) -> Span {
    tracing::info_span!(
        "gen_ai.generate",
        "gen_ai.operation.name" = "generate_content",
        "gen_ai.request.model" = model,
        "gen_ai.provider.name" = "suno",
        "songbatch.variant" = variant,
        "songbatch.jobs" = tracing::field::Empty,
    )
}

/// Start a span for a status poll over `job_count` jobs.
pub fn start_poll_span(job_count: usize) -> Span {
    tracing::debug_span!(
        "gen_ai.poll",
        "gen_ai.provider.name" = "suno",
        "songbatch.jobs" = job_count,
    )
}

pub fn record_job_count(span: &Span, jobs: usize) {
    span.record("songbatch.jobs", jobs);
}
