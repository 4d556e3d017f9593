// src/error.rs
//! Error taxonomy for the ingest core.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading checkpoints, fetching pages or emitting events.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The checkpoint store cannot be opened (inaccessible or corrupt).
    #[error("checkpoint store unavailable at {path}: {reason}")]
    StoreUnavailable { path: PathBuf, reason: String },

    /// Flushing the checkpoint store to disk failed.
    #[error("checkpoint store write failed at {path}: {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A write was attempted after the store handle was closed.
    #[error("checkpoint store at {0} is already closed")]
    StoreClosed(PathBuf),

    /// Transport failure or non-success HTTP status.
    #[error("fetch from {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    /// Payload could not be interpreted as a list of records.
    #[error("malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("record is missing ordering field `{field}`")]
    MissingOrderField { field: String },

    /// Ordering value present, but not something we can place in time.
    #[error("value `{value}` of field `{field}` is not a recognizable point in time")]
    InvalidTimestamp { field: String, value: String },

    /// Downstream sink rejected an event.
    #[error("event sink rejected record: {0}")]
    Emit(#[source] std::io::Error),
}

impl IngestError {
    /// Only a store that cannot be opened stops the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::StoreUnavailable { .. })
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
