//! Core data model.
//!
//! A work item is one row of an input batch: one generation request. Submitting
//! it yields job handles, and every completed handle becomes one downloaded
//! artifact plus one result row.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// One generation request parsed from an input CSV row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Caller-chosen identifier (the CSV `index` column). Names output files.
    pub identifier: String,

    /// What to generate.
    pub payload: Payload,

    pub make_instrumental: bool,

    /// Upstream model name. None = runner default.
    pub model: Option<String>,
}

/// Generation input: a free-form prompt, or explicit lyrics plus style tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Prompt { prompt: String },
    Custom { lyrics: String, tags: String },
}

/// Which input schema a batch uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// `index, prompt[, make_instrumental, model]`
    Prompt,
    /// `index, lyrics, tags[, make_instrumental, model]`
    Custom,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Variant::Prompt => "prompt",
            Variant::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Job Handle
// ---------------------------------------------------------------------------

/// A submitted generation job as reported by the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub lyric: Option<String>,
}

/// Upstream job status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Submitted,
    #[serde(alias = "queued", alias = "streaming")]
    Processing,
    Complete,
    Error,
    /// Anything the runner does not recognise. Treated as still in progress.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Will polling this job ever change its status again?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
            JobStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Result Row
// ---------------------------------------------------------------------------

/// One output CSV row, written per downloaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Identifier of the work item that produced the artifact.
    pub index: String,
    /// Artifact index within the item's submission.
    pub cnt: u32,
    pub title: String,
    pub file_name: String,
    pub lyrics: String,
}

impl ResultRow {
    /// Flatten into an ordered record for the results writer.
    pub fn to_record(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut record = serde_json::Map::new();
        record.insert("index".into(), self.index.clone().into());
        record.insert("cnt".into(), self.cnt.into());
        record.insert("title".into(), self.title.clone().into());
        record.insert("file_name".into(), self.file_name.clone().into());
        record.insert("lyrics".into(), self.lyrics.clone().into());
        record
    }
}
