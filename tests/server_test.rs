//! Router tests through `tower::ServiceExt::oneshot`.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{FakeClient, fast_config, wav_url};
use songbatch::config::RunnerConfig;
use songbatch::engine::{BatchController, DirectGenerator};
use songbatch::server::{AppState, router};

fn app(client: FakeClient, root: &Path) -> (Router, Arc<BatchController>) {
    let (router, controller, _) = app_with(Arc::new(client), fast_config(), root);
    (router, controller)
}

fn app_with(
    client: Arc<FakeClient>,
    config: RunnerConfig,
    root: &Path,
) -> (Router, Arc<BatchController>, Arc<DirectGenerator>) {
    let direct = Arc::new(DirectGenerator::new(Arc::clone(&client) as _, &config));
    let controller = Arc::new(BatchController::new(client, config, root));
    let router = router(AppState {
        controller: Arc::clone(&controller),
        direct: Arc::clone(&direct),
    });
    (router, controller, direct)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = app(FakeClient::new(), tmp.path());

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn status_is_not_found_before_any_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = app(FakeClient::new(), tmp.path());

    let (status, body) = send(&app, get("/api/batch")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn batch_generate_acknowledges_and_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, controller) = app(FakeClient::new(), tmp.path());

    let (status, body) = send(
        &app,
        post_json(
            "/api/batch_generate",
            json!({"csv_string": "index,prompt\n1,x\n2,y\n", "run_name": "web"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let summary = tokio::time::timeout(Duration::from_secs(10), controller.wait())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.completed, 2);

    let (status, body) = send(&app, get("/api/batch")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run_name"], "web");
    assert_eq!(body["variant"], "prompt");
    assert_eq!(body["total"], 2);
    assert_eq!(body["artifacts"], 4);
    assert_eq!(body["finished"], true);
    assert!(tmp.path().join("web.csv").is_file());
}

#[tokio::test]
async fn batch_generate_custom_uses_lyrics_schema() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, controller) = app(FakeClient::new().jobs_per_submit(1), tmp.path());

    let (status, _) = send(
        &app,
        post_json(
            "/api/batch_generate_custom",
            json!({"csv_string": "index,lyrics,tags\n1,la la,pop\n", "run_name": "lyrics"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    controller.wait().await.unwrap().unwrap();

    let (status, body) = send(
        &app,
        post_json(
            "/api/batch_generate_custom",
            json!({"csv_string": "index,prompt\n1,x\n", "run_name": "wrong"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("missing column")
    );
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = app(FakeClient::new(), tmp.path());

    let (status, body) = send(
        &app,
        post_json("/api/batch_generate", json!({"run_name": "no-csv"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(
        &app,
        post_json(
            "/api/batch_generate",
            json!({"csv_string": "index,prompt\n1,x\n", "run_name": "a/b"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn overlapping_batch_is_conflict() {
    let tmp = tempfile::tempdir().unwrap();
    let (client, gate) = FakeClient::new().gated();
    let (app, controller) = app(client, tmp.path());

    let request = || {
        post_json(
            "/api/batch_generate",
            json!({"csv_string": "index,prompt\n1,x\n", "run_name": "busy"}),
        )
    };
    let (status, _) = send(&app, request()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, request()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (_, body) = send(&app, get("/api/batch")).await;
    assert_eq!(body["finished"], false);

    gate.add_permits(10);
    controller.wait().await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// One-off generation and WAV lookup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worker_generate_returns_the_upstream_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(FakeClient::new());
    let (app, _, direct) = app_with(Arc::clone(&client), fast_config(), tmp.path());

    let (status, body) = send(
        &app,
        post_json("/api/worker_generate", json!({"prompt": "a waltz"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body.as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["status"], "submitted");

    let (status, _) = send(
        &app,
        post_json(
            "/api/worker_generate",
            json!({"prompt": "a tango", "make_instrumental": "yes", "model": "chirp-v4"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let models: Vec<String> = client.calls().into_iter().map(|(_, m)| m).collect();
    assert_eq!(models, ["chirp-v3-5", "chirp-v4"]);
    assert_eq!(direct.active(), 0);
    // One-off generations never start a batch.
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn worker_generate_requires_a_prompt() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(FakeClient::new());
    let (app, _, _) = app_with(Arc::clone(&client), fast_config(), tmp.path());

    for body in [json!({}), json!({"prompt": "  "}), json!({"prompt": null})] {
        let (status, reply) = send(&app, post_json("/api/worker_generate", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["error"]["message"], "Prompt is required");
    }
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn worker_generate_answers_empty_when_all_slots_are_busy() {
    let tmp = tempfile::tempdir().unwrap();
    let (client, gate) = FakeClient::new().gated();
    let client = Arc::new(client);
    let config = RunnerConfig {
        max_direct_generations: 1,
        ..fast_config()
    };
    let (app, _, direct) = app_with(Arc::clone(&client), config, tmp.path());

    let first = tokio::spawn({
        let app = app.clone();
        async move {
            send(&app, post_json("/api/worker_generate", json!({"prompt": "one"}))).await
        }
    });
    tokio::time::timeout(Duration::from_secs(5), async {
        while direct.active() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("first generation holds the slot");

    let (status, body) = send(
        &app,
        post_json("/api/worker_generate", json!({"prompt": "two"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    gate.add_permits(1);
    let (status, body) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(direct.active(), 0);
    assert_eq!(client.calls().len(), 1);
}

#[tokio::test]
async fn get_wav_passes_the_upstream_answer_through() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(FakeClient::new());
    let (app, _, _) = app_with(Arc::clone(&client), fast_config(), tmp.path());

    let (status, body) = send(&app, get("/api/get_wav?clip_id=abc")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"wav_file_url": wav_url("abc")}));

    let (status, body) = send(&app, get("/api/get_wav")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "clip_id is required");

    assert_eq!(client.wav_requests(), ["abc"]);
}

#[tokio::test]
async fn upstream_payment_error_is_passed_on() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = app(FakeClient::new(), tmp.path());

    let (status, body) = send(&app, get("/api/get_wav?clip_id=unpaid-1")).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["code"], "PAYMENT_REQUIRED");
    assert_eq!(body["error"]["message"], "Insufficient credits.");
}
