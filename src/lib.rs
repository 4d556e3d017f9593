// src/lib.rs
//! Checkpointed incremental polling of sorted, filterable REST resources.
//!
//! Each configured [`Source`] is polled one page at a time for records newer
//! than its checkpoint; every record becomes an [`Event`] for the host, and the
//! checkpoint advances to the newest position seen once the page is emitted.

pub mod checkpoint;
pub mod error;
pub mod host;
pub mod ingest;

// ---- Re-exports for stable public API ----
pub use crate::checkpoint::CheckpointStore;
pub use crate::error::IngestError;
pub use crate::ingest::types::{ConfigSource, Event, EventSink, Record, RecordFetcher, Source};
pub use crate::ingest::{run_cycle, CycleOutcome, Ingester, RunSummary};
