//! Batch input parsing: CSV text into work items.

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::{Payload, Variant, WorkItem};

/// Raw CSV row. Columns not listed here are ignored.
#[derive(Debug, Deserialize)]
struct InputRow {
    #[serde(alias = "name")]
    index: String,
    prompt: Option<String>,
    lyrics: Option<String>,
    tags: Option<String>,
    make_instrumental: Option<String>,
    model: Option<String>,
}

/// Parse a batch CSV into work items, in file order.
///
/// Rejects the whole batch on the first bad row: a batch either seeds
/// completely or not at all.
pub fn parse_batch(csv_text: &str, variant: Variant) -> Result<Vec<WorkItem>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let headers = reader.headers()?.clone();
    let has = |name: &str| headers.iter().any(|h| h == name);
    if !has("index") && !has("name") {
        return Err(Error::InvalidInput("missing column: index".to_string()));
    }
    let required: &[&str] = match variant {
        Variant::Prompt => &["prompt"],
        Variant::Custom => &["lyrics", "tags"],
    };
    for column in required {
        if !has(column) {
            return Err(Error::InvalidInput(format!("missing column: {column}")));
        }
    }

    let mut items = Vec::new();
    let mut seen = HashSet::new();

    for (n, row) in reader.deserialize::<InputRow>().enumerate() {
        // Header is line 1.
        let line = n + 2;
        let row = row?;

        let identifier = row.index;
        validate_identifier(&identifier)
            .map_err(|e| Error::InvalidInput(format!("line {line}: {e}")))?;
        if !seen.insert(identifier.clone()) {
            return Err(Error::InvalidInput(format!(
                "line {line}: duplicate index '{identifier}'"
            )));
        }

        let payload = match variant {
            Variant::Prompt => Payload::Prompt {
                prompt: row.prompt.unwrap_or_default(),
            },
            Variant::Custom => Payload::Custom {
                lyrics: row.lyrics.unwrap_or_default(),
                tags: row.tags.unwrap_or_default(),
            },
        };

        items.push(WorkItem {
            identifier,
            payload,
            make_instrumental: row.make_instrumental.as_deref().is_some_and(parse_flag),
            model: row.model.filter(|m| !m.is_empty()),
        });
    }

    if items.is_empty() {
        return Err(Error::InvalidInput("batch contains no rows".to_string()));
    }
    Ok(items)
}

/// Identifiers name files inside the run directory, so they must be a single
/// plain path component.
fn validate_identifier(identifier: &str) -> std::result::Result<(), String> {
    if identifier.is_empty() {
        return Err("empty index".to_string());
    }
    if identifier.contains(['/', '\\']) || identifier == "." || identifier == ".." {
        return Err(format!("index '{identifier}' is not a valid file name"));
    }
    Ok(())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y"
    )
}
