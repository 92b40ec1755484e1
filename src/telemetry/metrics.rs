//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`; with
//! no provider installed the instruments are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("songbatch")
}

/// Counter: batches accepted. Labels: `variant`.
pub fn batches_started() -> Counter<u64> {
    meter()
        .u64_counter("songbatch.batches.started")
        .with_description("Number of batches accepted")
        .build()
}

/// Counter: submission attempts. Labels: `result` ("ok" | "requeued" | "dropped").
pub fn submissions() -> Counter<u64> {
    meter()
        .u64_counter("songbatch.items.submissions")
        .with_description("Number of generation submissions by outcome")
        .build()
}

/// Counter: finished items. Labels: `result` ("completed" | "failed").
pub fn items_finished() -> Counter<u64> {
    meter()
        .u64_counter("songbatch.items.finished")
        .with_description("Number of work items that left the pipeline")
        .build()
}

/// Counter: artifacts. Labels: `result` ("downloaded" | "failed").
pub fn artifacts() -> Counter<u64> {
    meter()
        .u64_counter("songbatch.artifacts")
        .with_description("Number of artifacts downloaded or lost")
        .build()
}

/// Histogram: time from submit to all jobs terminal, in milliseconds.
pub fn generation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("songbatch.generation.duration_ms")
        .with_description("Time from submission until every job reached a terminal status")
        .with_unit("ms")
        .build()
}
