//! HTTP client for a suno-api compatible gateway.
//!
//! Endpoints used:
//! - `POST /api/generate` for prompt-driven generation
//! - `POST /api/custom_generate` for lyrics + tags
//! - `GET /api/get?ids=a,b` to refresh job status
//! - `GET /api/get_wav?clip_id=x` for the WAV rendition of a clip
//!
//! Audio files are fetched with a plain GET of each job's `audio_url`.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

use super::{ByteStream, ClientError, GenerationClient, SubmitRequest};
use crate::model::{JobHandle, Payload};

pub struct SunoClient {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
    make_instrumental: bool,
    model: &'a str,
    wait_audio: bool,
}

#[derive(Debug, Serialize)]
struct CustomGenerateBody<'a> {
    prompt: &'a str,
    tags: &'a str,
    title: &'a str,
    make_instrumental: bool,
    model: &'a str,
    wait_audio: bool,
}

impl SunoClient {
    /// * `api_url` - Base HTTP URL, e.g. `http://localhost:3000`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] (shared connection pool).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Ensure the response has a success status code, otherwise turn it into
    /// [`ClientError::Api`] carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_handles(response: reqwest::Response) -> Result<Vec<JobHandle>, ClientError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<Vec<JobHandle>>().await?)
    }
}

#[async_trait]
impl GenerationClient for SunoClient {
    async fn submit(&self, request: SubmitRequest<'_>) -> Result<Vec<JobHandle>, ClientError> {
        let builder = match request.payload {
            Payload::Prompt { prompt } => self
                .client
                .post(format!("{}/api/generate", self.api_url))
                .json(&GenerateBody {
                    prompt,
                    make_instrumental: request.make_instrumental,
                    model: request.model,
                    wait_audio: request.wait_audio,
                }),
            Payload::Custom { lyrics, tags } => self
                .client
                .post(format!("{}/api/custom_generate", self.api_url))
                .json(&CustomGenerateBody {
                    prompt: lyrics,
                    tags,
                    title: request.title,
                    make_instrumental: request.make_instrumental,
                    model: request.model,
                    wait_audio: request.wait_audio,
                }),
        };

        Self::parse_handles(builder.send().await?).await
    }

    async fn poll(&self, ids: &[String]) -> Result<Vec<JobHandle>, ClientError> {
        let response = self
            .client
            .get(format!("{}/api/get", self.api_url))
            .query(&[("ids", ids.join(","))])
            .send()
            .await?;

        Self::parse_handles(response).await
    }

    async fn download(&self, url: &str) -> Result<ByteStream, ClientError> {
        let response = Self::ensure_success(self.client.get(url).send().await?).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ClientError::from))
            .boxed())
    }

    async fn get_wav(&self, clip_id: &str) -> Result<Value, ClientError> {
        let response = self
            .client
            .get(format!("{}/api/get_wav", self.api_url))
            .query(&[("clip_id", clip_id)])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<Value>().await?)
    }
}
