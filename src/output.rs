//! Per-run output layout: download directory allocation, artifact file names,
//! and the shared download error log.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

pub const ERROR_LOG_NAME: &str = "download_error.txt";
const DEFAULT_EXTENSION: &str = "mp3";

/// Reject run names that would escape `output_root` or produce odd paths.
pub fn validate_run_name(run_name: &str) -> Result<()> {
    let ok = !run_name.is_empty()
        && run_name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
        && !run_name.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid run name '{run_name}'")))
    }
}

/// Create `{root}/download-{run_name}-{n}` for the lowest `n` not already taken.
///
/// Concurrent callers never share a directory.
pub async fn allocate_run_dir(root: &Path, run_name: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(root).await?;
    let mut n = 0u32;
    loop {
        let candidate = root.join(format!("download-{run_name}-{n}"));
        match tokio::fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Path of the results CSV for a run.
pub fn results_path(root: &Path, run_name: &str) -> PathBuf {
    root.join(format!("{run_name}.csv"))
}

/// File extension of the audio behind `url`, defaulting to `mp3`.
pub fn extension_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && is_plain_extension(ext) => ext,
        _ => DEFAULT_EXTENSION,
    }
}

fn is_plain_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// `{identifier}-{artifact_index}.{ext}`
pub fn artifact_file_name(identifier: &str, artifact_index: u32, url: &str) -> String {
    format!("{identifier}-{artifact_index}.{}", extension_from_url(url))
}

/// Append-only log of failed artifacts, one `{identifier} - {error}` line each.
pub struct ErrorLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ErrorLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(ERROR_LOG_NAME),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, identifier: &str, error: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let line = format!(
            "{identifier} - {} [{}]\n",
            error.replace(['\n', '\r'], " "),
            Utc::now().to_rfc3339()
        );
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
