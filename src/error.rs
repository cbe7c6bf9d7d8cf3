//! Error types for the query digest pipeline.
//!
//! Per-record failures ([`MetadataError`], [`CallerParseError`],
//! [`RecordError`]) are logged and skipped by the batch driver. Only
//! [`DigestError`] reaches the command line.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The operation kind or the tables of a query could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not extract metadata for {query}")]
pub struct MetadataError {
    pub query: String,
}

/// A caller name did not match any of the known shapes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not parse caller name: {method}")]
pub struct CallerParseError {
    pub method: String,
}

/// A raw log record does not have the shape its source promises.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failures while talking to the log store.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("log store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("log store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected log store response: {0}")]
    Response(String),
}

/// Top-level error surfaced by the command line tool.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("{0}")]
    CommandLine(String),

    #[error("unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("no queries found for {0}")]
    NoQueries(String),

    #[error("unable to write the report: {0}")]
    Output(#[from] io::Error),

    #[error("unable to write CSV: {0}")]
    Csv(#[from] csv::Error),
}

impl DigestError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            DigestError::CommandLine(_) => 2,
            DigestError::Read { .. } => 3,
            DigestError::Retrieval(_) => 4,
            DigestError::NoQueries(_) => 5,
            DigestError::Output(_) | DigestError::Csv(_) => 1,
        }
    }
}
