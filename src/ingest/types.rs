// src/ingest/types.rs
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// One unit of remote data: a JSON object keyed by field name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Category tag carried by every emitted event.
pub const SOURCETYPE: &str = "feed-data";

/// A configured feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub url: String,
    /// Field used both for ordering and for the "newer than" filter.
    #[serde(alias = "date_field")]
    pub order_field: String,
    /// Starting position when the store holds nothing for this source.
    #[serde(alias = "default_checkpoint_date")]
    pub default_checkpoint: String,
    /// Requested page size; clamped by the fetcher.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Zone for ordering values that carry no offset of their own.
    #[serde(default)]
    pub naive_tz: NaiveTz,
}

/// How to read a timestamp without an offset, e.g. `2016-01-02T00:00:00.000`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NaiveTz {
    /// The host's local timezone.
    #[default]
    Local,
    Utc,
}

/// Normalized output of the ingest loop, one per fetched record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub stanza: String,
    pub time: DateTime<Utc>,
    pub sourcetype: &'static str,
    pub data: String,
}

impl Event {
    pub fn new(stanza: &str, time: DateTime<Utc>, record: Record) -> Self {
        Self {
            stanza: stanza.to_string(),
            time,
            sourcetype: SOURCETYPE,
            data: serde_json::Value::Object(record).to_string(),
        }
    }

    /// Epoch seconds with millisecond precision, e.g. `1451692800.000`.
    pub fn epoch_seconds(&self) -> String {
        let ms = self.time.timestamp_millis();
        let sign = if ms < 0 { "-" } else { "" };
        let abs = ms.unsigned_abs();
        format!("{sign}{}.{:03}", abs / 1000, abs % 1000)
    }
}

/// Parameters of a single bounded page request.
#[derive(Debug, Clone, Copy)]
pub struct PageQuery<'a> {
    pub url: &'a str,
    pub order_field: &'a str,
    /// Exclusive lower bound on the ordering field.
    pub since: &'a str,
    pub limit: Option<i64>,
}

/// One fetched page. Consumed once, in server order.
#[derive(Debug, Default)]
pub struct Page {
    records: Vec<Record>,
}

impl Page {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IntoIterator for Page {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// Remote data resource that answers one sorted, filtered, bounded query per call.
#[async_trait::async_trait]
pub trait RecordFetcher: Send + Sync {
    async fn fetch(&self, query: &PageQuery<'_>) -> Result<Page>;
    fn name(&self) -> &'static str;
}

/// Downstream consumer of normalized events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event) -> Result<()>;
}

/// Supplies the configured sources; the host transport is the adapter's problem.
pub trait ConfigSource {
    fn list_sources(&self) -> anyhow::Result<Vec<Source>>;
}

// --- Test helper ---
pub struct MemorySink {
    pub events: Mutex<Vec<Event>>,
    fail_at: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(vec![]),
            fail_at: None,
        }
    }

    /// Reject the event that would become number `n` (zero based).
    pub fn failing_at(n: usize) -> Self {
        Self {
            events: Mutex::new(vec![]),
            fail_at: Some(n),
        }
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) -> Result<()> {
        let mut events = self.lock();
        if self.fail_at == Some(events.len()) {
            return Err(IngestError::Emit(std::io::Error::other("sink closed")));
        }
        events.push(event.clone());
        Ok(())
    }
}
