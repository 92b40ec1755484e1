//! Shared fixtures: an in-process fake generation API.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use songbatch::client::{ByteStream, ClientError, GenerationClient, SubmitRequest};
use songbatch::config::RunnerConfig;
use songbatch::model::{JobHandle, JobStatus};

/// Scripted upstream. Every submit for title `t` creates
/// `jobs_per_submit` jobs `t-{attempt}-{k}` whose lyric names the attempt.
/// A job reports `complete` on its first poll unless a status script says
/// otherwise.
#[derive(Default)]
pub struct FakeClient {
    state: Mutex<FakeState>,
    gate: Option<Arc<Semaphore>>,
    jobs_per_submit: usize,
}

#[derive(Default)]
struct FakeState {
    /// Remaining submit failures per title.
    submit_failures: HashMap<String, u32>,
    /// Titles that never submit successfully.
    always_fail: HashSet<String>,
    /// Submit calls per title, failures included.
    attempts: HashMap<String, u32>,
    /// Every submit call in order, as (title, model).
    calls: Vec<(String, String)>,
    /// When each submit call for a title arrived.
    submit_times: HashMap<String, Vec<Instant>>,
    /// Finished form of every job, keyed by job id.
    jobs: HashMap<String, JobHandle>,
    /// Status sequences per (title, k), applied to every attempt.
    scripts: HashMap<(String, usize), Vec<JobStatus>>,
    /// Script and position of each job that has one, keyed by job id.
    job_scripts: HashMap<String, (Vec<JobStatus>, usize)>,
    failing_downloads: HashSet<String>,
    poll_always_fails: bool,
    /// 1-based poll call numbers that fail.
    failing_polls: HashSet<usize>,
    polls: usize,
    /// Ids asked about by each poll call, failed ones included.
    poll_batches: Vec<Vec<String>>,
    wav_requests: Vec<String>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            jobs_per_submit: 2,
            ..Default::default()
        }
    }

    pub fn jobs_per_submit(mut self, n: usize) -> Self {
        self.jobs_per_submit = n;
        self
    }

    /// Block every submit until the returned semaphore gets permits.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn fail_submits(self, title: &str, times: u32) -> Self {
        self.state
            .lock()
            .submit_failures
            .insert(title.to_string(), times);
        self
    }

    pub fn always_fail(self, title: &str) -> Self {
        self.state.lock().always_fail.insert(title.to_string());
        self
    }

    pub fn fail_download(self, url: &str) -> Self {
        self.state.lock().failing_downloads.insert(url.to_string());
        self
    }

    pub fn fail_polls(self) -> Self {
        self.state.lock().poll_always_fails = true;
        self
    }

    /// Fail exactly these poll calls, counted from 1.
    pub fn fail_polls_on(self, calls: &[usize]) -> Self {
        self.state.lock().failing_polls.extend(calls.iter().copied());
        self
    }

    /// Job `k` of every submit for `title` reports `statuses` on successive
    /// successful polls, then repeats the last one.
    pub fn script(self, title: &str, k: usize, statuses: &[JobStatus]) -> Self {
        self.state
            .lock()
            .scripts
            .insert((title.to_string(), k), statuses.to_vec());
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.state.lock().calls.clone()
    }

    pub fn submitted_titles(&self) -> Vec<String> {
        self.calls().into_iter().map(|(title, _)| title).collect()
    }

    pub fn attempts(&self, title: &str) -> u32 {
        self.state.lock().attempts.get(title).copied().unwrap_or(0)
    }

    pub fn polls(&self) -> usize {
        self.state.lock().polls
    }

    pub fn poll_batches(&self) -> Vec<Vec<String>> {
        self.state.lock().poll_batches.clone()
    }

    pub fn submit_times(&self, title: &str) -> Vec<Instant> {
        self.state
            .lock()
            .submit_times
            .get(title)
            .cloned()
            .unwrap_or_default()
    }

    pub fn wav_requests(&self) -> Vec<String> {
        self.state.lock().wav_requests.clone()
    }
}

pub fn wav_url(clip_id: &str) -> String {
    format!("http://fake.test/wav/{clip_id}.wav")
}

pub fn audio_url(title: &str, attempt: u32, k: usize) -> String {
    format!("http://fake.test/{title}/{attempt}/{k}.mp3")
}

pub fn lyric(title: &str, attempt: u32) -> String {
    format!("lyrics for {title}, attempt {attempt}")
}

#[async_trait]
impl GenerationClient for FakeClient {
    async fn submit(&self, request: SubmitRequest<'_>) -> Result<Vec<JobHandle>, ClientError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|e| ClientError::Stream(e.to_string()))?;
        }

        let title = request.title.to_string();
        let mut state = self.state.lock();
        state.calls.push((title.clone(), request.model.to_string()));
        state
            .submit_times
            .entry(title.clone())
            .or_default()
            .push(Instant::now());
        let attempt = {
            let n = state.attempts.entry(title.clone()).or_insert(0);
            *n += 1;
            *n
        };

        if state.always_fail.contains(&title) {
            return Err(ClientError::Api {
                status: 500,
                body: "permanently broken".to_string(),
            });
        }
        if let Some(remaining) = state.submit_failures.get_mut(&title) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::Api {
                    status: 503,
                    body: "try again".to_string(),
                });
            }
        }

        let handles: Vec<JobHandle> = (0..self.jobs_per_submit)
            .map(|k| JobHandle {
                id: format!("{title}-{attempt}-{k}"),
                status: JobStatus::Submitted,
                audio_url: None,
                title: Some(title.clone()),
                lyric: None,
            })
            .collect();
        for (k, handle) in handles.iter().enumerate() {
            if let Some(script) = state.scripts.get(&(title.clone(), k)).cloned() {
                state.job_scripts.insert(handle.id.clone(), (script, 0));
            }
            let done = JobHandle {
                status: JobStatus::Complete,
                audio_url: Some(audio_url(&title, attempt, k)),
                lyric: Some(lyric(&title, attempt)),
                ..handle.clone()
            };
            state.jobs.insert(handle.id.clone(), done);
        }
        Ok(handles)
    }

    async fn poll(&self, ids: &[String]) -> Result<Vec<JobHandle>, ClientError> {
        let mut state = self.state.lock();
        state.polls += 1;
        let call = state.polls;
        state.poll_batches.push(ids.to_vec());
        if state.poll_always_fails || state.failing_polls.contains(&call) {
            return Err(ClientError::Api {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }

        let mut answer = Vec::new();
        for id in ids {
            let Some(done) = state.jobs.get(id).cloned() else {
                continue;
            };
            let status = match state.job_scripts.get_mut(id) {
                Some((script, at)) => {
                    let status = script
                        .get(*at)
                        .or(script.last())
                        .copied()
                        .unwrap_or(JobStatus::Complete);
                    *at += 1;
                    status
                }
                None => JobStatus::Complete,
            };
            answer.push(match status {
                JobStatus::Complete => done,
                status => JobHandle {
                    status,
                    audio_url: None,
                    lyric: None,
                    ..done
                },
            });
        }
        Ok(answer)
    }

    async fn download(&self, url: &str) -> Result<ByteStream, ClientError> {
        if self.state.lock().failing_downloads.contains(url) {
            let chunks = vec![
                Ok(b"partial".to_vec()),
                Err(ClientError::Stream("connection reset".to_string())),
            ];
            return Ok(futures::stream::iter(chunks).boxed());
        }
        let body = format!("audio from {url}").into_bytes();
        Ok(futures::stream::iter(vec![Ok(body)]).boxed())
    }

    async fn get_wav(&self, clip_id: &str) -> Result<Value, ClientError> {
        self.state.lock().wav_requests.push(clip_id.to_string());
        if clip_id.starts_with("unpaid") {
            return Err(ClientError::Api {
                status: 402,
                body: json!({"detail": "Insufficient credits."}).to_string(),
            });
        }
        Ok(json!({ "wav_file_url": wav_url(clip_id) }))
    }
}

/// Runner settings with every delay shrunk to nothing.
pub fn fast_config() -> RunnerConfig {
    RunnerConfig {
        pool_size: 2,
        start_stagger_ms: 0,
        retry_backoff_ms: 1,
        retry_backoff_max_ms: 4,
        poll_interval_ms: 0,
        ..Default::default()
    }
}

/// Parse a results CSV with the `csv` crate into (header, rows).
pub fn read_results(path: &std::path::Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).expect("results file readable");
    let header = reader
        .headers()
        .expect("header row")
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|r| r.expect("valid row").iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}
