//! Integration tests for telemetry initialization and span helpers.

use opentelemetry::KeyValue;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be installed once per process, so a second
    // init in the same test binary may return Err.
    let config = songbatch::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "songbatch-test".to_string(),
        default_filter: "debug".to_string(),
    };
    if let Ok(guard) = songbatch::telemetry::init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn generation_span_records_job_count() {
    let span = songbatch::telemetry::genai::start_generation_span("chirp-v3-5", "prompt");
    songbatch::telemetry::genai::record_job_count(&span, 2);
    let _poll = songbatch::telemetry::genai::start_poll_span(2);
}

#[test]
fn item_span_records_transitions_and_artifacts() {
    let span = songbatch::telemetry::work::start_item_span(3, "song-1", 1);
    songbatch::telemetry::work::record_state_transition(&span, "fetching", "submitting");
    songbatch::telemetry::work::record_artifact_count(&span, 2);
}

#[test]
fn metric_instruments_are_noops_without_a_provider() {
    use songbatch::telemetry::metrics;

    metrics::batches_started().add(1, &[KeyValue::new("variant", "prompt")]);
    metrics::submissions().add(1, &[KeyValue::new("result", "ok")]);
    metrics::items_finished().add(1, &[KeyValue::new("result", "completed")]);
    metrics::artifacts().add(1, &[KeyValue::new("result", "downloaded")]);
    metrics::generation_duration_ms().record(12.5, &[KeyValue::new("model", "chirp-v3-5")]);
}
