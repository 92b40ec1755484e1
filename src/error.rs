//! Error types for songbatch.

use std::path::PathBuf;

use thiserror::Error;

use crate::client::ClientError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid batch input: {0}")]
    InvalidInput(String),

    #[error("batch '{run_name}' is still in progress ({pending} item(s) pending)")]
    BatchInProgress { run_name: String, pending: usize },

    #[error("appending to an existing results file is not supported: {}", .0.display())]
    AppendUnsupported(PathBuf),

    #[error("results header already set")]
    HeaderAlreadySet,

    #[error("results header not yet set")]
    HeaderNotSet,

    #[error("generation client error: {0}")]
    Client(#[from] ClientError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
