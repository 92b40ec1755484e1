//! Worker pool tuning, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! pool_size = 4
//! start_stagger_ms = 50
//! max_submit_attempts = 0   # retry forever
//! queue_order = "lifo"
//!
//! [artifact_index_base]
//! prompt = 0
//! custom = 1
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Variant;

pub const DEFAULT_MODEL: &str = "chirp-v3-5";

/// Order in which workers take pending items off the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrder {
    /// Oldest first. Retried items go behind everything still pending.
    #[default]
    Fifo,
    /// Newest first. Retried items are taken again before untried ones.
    Lifo,
}

/// First artifact index per input schema, each 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtifactIndexBase {
    pub prompt: u32,
    pub custom: u32,
}

impl Default for ArtifactIndexBase {
    fn default() -> Self {
        Self {
            prompt: 1,
            custom: 1,
        }
    }
}

impl ArtifactIndexBase {
    /// The same base for both schemas.
    pub fn uniform(base: u32) -> Self {
        Self {
            prompt: base,
            custom: base,
        }
    }

    pub fn for_variant(&self, variant: Variant) -> u32 {
        match variant {
            Variant::Prompt => self.prompt,
            Variant::Custom => self.custom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Number of concurrent workers per batch.
    pub pool_size: usize,
    /// Delay between starting consecutive workers.
    pub start_stagger_ms: u64,
    /// Backoff after the first failed submission; doubles per attempt.
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    /// Submissions allowed per item before it is dropped. 0 = unlimited.
    pub max_submit_attempts: u32,
    /// Delay between status polls. 0 = poll again immediately.
    pub poll_interval_ms: u64,
    /// Consecutive poll failures tolerated per item. 0 = unlimited.
    pub max_poll_failures: u32,
    /// Give up on an item whose jobs have not finished in this long. 0 = never.
    pub poll_timeout_secs: u64,
    pub queue_order: QueueOrder,
    /// First artifact index used in file names and result rows.
    pub artifact_index_base: ArtifactIndexBase,
    pub default_model: String,
    /// Ask the upstream to hold the submit response until audio is ready.
    pub wait_audio: bool,
    /// Request append mode for the results CSV. Unsupported for existing files.
    pub append_results: bool,
    /// Accept batches in the lyrics + tags schema.
    pub supports_custom_lyrics: bool,
    /// Concurrent one-off generations allowed outside of batches.
    pub max_direct_generations: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            start_stagger_ms: 10,
            retry_backoff_ms: 1_000,
            retry_backoff_max_ms: 60_000,
            max_submit_attempts: 5,
            poll_interval_ms: 2_000,
            max_poll_failures: 30,
            poll_timeout_secs: 900,
            queue_order: QueueOrder::Fifo,
            artifact_index_base: ArtifactIndexBase::default(),
            default_model: DEFAULT_MODEL.to_string(),
            wait_audio: true,
            append_results: false,
            supports_custom_lyrics: true,
            max_direct_generations: 10,
        }
    }
}

impl RunnerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RunnerConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad runner config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file from disk.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read runner config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be at least 1".to_string()));
        }
        if self.max_direct_generations == 0 {
            return Err(Error::Config(
                "max_direct_generations must be at least 1".to_string(),
            ));
        }
        let bases = self.artifact_index_base;
        for (variant, base) in [("prompt", bases.prompt), ("custom", bases.custom)] {
            if base > 1 {
                return Err(Error::Config(format!(
                    "artifact_index_base.{variant} must be 0 or 1, got {base}"
                )));
            }
        }
        if self.default_model.trim().is_empty() {
            return Err(Error::Config("default_model must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn start_stagger(&self) -> Duration {
        Duration::from_millis(self.start_stagger_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        (self.poll_timeout_secs > 0).then(|| Duration::from_secs(self.poll_timeout_secs))
    }

    /// Backoff to wait after the `attempt`-th failed submission (1-based).
    ///
    /// Grows as `retry_backoff_ms * 2^(attempt-1)`, clamped to
    /// `retry_backoff_max_ms`.
    pub fn submit_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_backoff_max_ms.max(self.retry_backoff_ms));
        Duration::from_millis(ms)
    }

    /// Has an item used up its submission budget after `attempts` tries?
    pub fn submit_attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_submit_attempts > 0 && attempts >= self.max_submit_attempts
    }

    pub fn poll_failures_exhausted(&self, failures: u32) -> bool {
        self.max_poll_failures > 0 && failures >= self.max_poll_failures
    }
}
