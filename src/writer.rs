//! Append-only CSV sink for result rows.
//!
//! The header is taken from the first record written and fixed for the
//! lifetime of the writer. Later records are projected onto that header;
//! columns a record lacks are written as empty cells. All writes go through one
//! async mutex and are flushed before the lock is released, so lines land on
//! disk in the order callers acquired the writer.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

pub type Record = Map<String, Value>;

pub struct ResultWriter {
    path: PathBuf,
    state: Mutex<WriterState>,
}

struct WriterState {
    file: File,
    header: Vec<String>,
}

impl ResultWriter {
    /// Open `path` for writing, truncating any existing file.
    ///
    /// Appending to an existing file is not supported: with `append` set and
    /// the file already present this fails with [`Error::AppendUnsupported`]
    /// before anything is touched.
    pub async fn open(path: impl AsRef<Path>, append: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Self::check_append(&path, append).await?;
        let file = File::create(&path).await?;
        debug!(path = %path.display(), "results file opened");
        Ok(Self {
            path,
            state: Mutex::new(WriterState {
                file,
                header: Vec::new(),
            }),
        })
    }

    /// Fail with [`Error::AppendUnsupported`] if `open` would refuse `path`.
    /// Touches nothing on disk.
    pub async fn check_append(path: &Path, append: bool) -> Result<()> {
        if append && tokio::fs::try_exists(path).await? {
            return Err(Error::AppendUnsupported(path.to_path_buf()));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The fixed header, empty until the first record or `set_header`.
    pub async fn header(&self) -> Vec<String> {
        self.state.lock().await.header.clone()
    }

    /// Set the header explicitly and write it out.
    pub async fn set_header(&self, header: Vec<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.header.is_empty() {
            return Err(Error::HeaderAlreadySet);
        }
        if header.is_empty() {
            return Err(Error::InvalidInput("results header has no columns".to_string()));
        }
        let line = format_line(header.iter().map(|h| Cow::Borrowed(h.as_str())));
        state.write_line(&line).await?;
        state.header = header;
        Ok(())
    }

    /// Write one record, deriving the header from it if none is set yet.
    pub async fn write_record(&self, record: &Record) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.header.is_empty() {
            if record.is_empty() {
                return Err(Error::InvalidInput(
                    "cannot derive a results header from an empty record".to_string(),
                ));
            }
            let header: Vec<String> = record.keys().cloned().collect();
            let line = format_line(header.iter().map(|h| Cow::Borrowed(h.as_str())));
            state.write_line(&line).await?;
            state.header = header;
        }

        let line = format_line(
            state
                .header
                .iter()
                .map(|key| Cow::Owned(resolve(record, key).map(cell_text).unwrap_or_default())),
        );
        state.write_line(&line).await
    }

    /// Write several records in order.
    pub async fn write_records(&self, records: &[Record]) -> Result<()> {
        for record in records {
            self.write_record(record).await?;
        }
        Ok(())
    }

    /// Write a positional row. Requires a header.
    pub async fn write_row(&self, values: &[Value]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.header.is_empty() {
            return Err(Error::HeaderNotSet);
        }
        let line = format_line(values.iter().map(|v| Cow::Owned(cell_text(v))));
        state.write_line(&line).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.state.lock().await.file.flush().await?;
        Ok(())
    }
}

impl WriterState {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Look up a header key in a record. Keys containing dots that are not present
/// verbatim are resolved as paths through nested objects.
fn resolve<'a>(record: &'a Record, key: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(key) {
        return Some(value);
    }
    if !key.contains('.') {
        return None;
    }
    let mut parts = key.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Text form of a cell value before escaping.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => value.to_string(),
        other => other.to_string(),
    }
}

/// Quote a cell if it contains a comma, a line break or a double quote,
/// doubling any embedded quotes.
pub fn escape_cell(text: &str) -> Cow<'_, str> {
    if text.contains([',', '\n', '\r', '"']) {
        Cow::Owned(format!("\"{}\"", text.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(text)
    }
}

fn format_line<'a>(cells: impl Iterator<Item = Cow<'a, str>>) -> String {
    let mut line = String::new();
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_cell(&cell));
    }
    line.push('\n');
    line
}
