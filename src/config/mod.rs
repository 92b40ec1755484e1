//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing. Worker pool
//! tuning lives in an optional TOML file, see [`runner::RunnerConfig`].

pub mod runner;

use std::path::PathBuf;

use crate::error::{Error, Result};

pub use runner::{ArtifactIndexBase, QueueOrder, RunnerConfig};

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the generation API gateway, e.g. `http://localhost:3000`.
    pub api_url: String,
    /// Directory that receives results CSVs and per-run download directories.
    pub output_root: PathBuf,
    pub bind_addr: String,
    pub runner: RunnerConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let runner = match std::env::var("RUNNER_CONFIG") {
            Ok(path) => RunnerConfig::load_from_file(&PathBuf::from(path))?,
            Err(_) => RunnerConfig::default(),
        };

        Ok(Self {
            api_url: required_var("GENERATION_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            output_root: std::env::var("OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("output")),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            runner,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
