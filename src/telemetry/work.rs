//! Work item span helpers.

use tracing::Span;

/// Start a span covering one attempt at one work item.
pub fn start_item_span(worker_id: usize, identifier: &str, attempt: u32) -> Span {
    tracing::info_span!(
        "batch.item",
        "worker.id" = worker_id,
        "item.identifier" = identifier,
        "item.attempt" = attempt,
        "item.artifacts" = tracing::field::Empty,
    )
}

/// Record a worker state transition inside the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}

pub fn record_artifact_count(span: &Span, count: usize) {
    span.record("item.artifacts", count);
}
