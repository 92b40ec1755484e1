//! Boundary to the upstream generation API.
//!
//! Workers only see the [`GenerationClient`] trait; [`suno::SunoClient`] is the
//! HTTP implementation used in production.

pub mod suno;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::model::{JobHandle, Payload};

pub use suno::SunoClient;

/// Chunks of a downloaded file, in order.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ClientError>>;

/// Errors from the generation API layer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-2xx status code.
    #[error("generation API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A download stream broke off part way.
    #[error("download interrupted: {0}")]
    Stream(String),
}

/// Everything the upstream needs to start one generation.
#[derive(Debug, Clone, Copy)]
pub struct SubmitRequest<'a> {
    pub payload: &'a Payload,
    /// Song title hint; the runner passes the item identifier.
    pub title: &'a str,
    pub make_instrumental: bool,
    pub model: &'a str,
    pub wait_audio: bool,
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Start a generation. Returns one handle per artifact the job will produce.
    async fn submit(&self, request: SubmitRequest<'_>) -> Result<Vec<JobHandle>, ClientError>;

    /// Fetch the current state of the given jobs.
    async fn poll(&self, ids: &[String]) -> Result<Vec<JobHandle>, ClientError>;

    /// Stream the file at `url`.
    async fn download(&self, url: &str) -> Result<ByteStream, ClientError>;

    /// Ask the upstream for the WAV rendition of a finished clip. The answer
    /// is passed through as-is.
    async fn get_wav(&self, clip_id: &str) -> Result<Value, ClientError>;
}
