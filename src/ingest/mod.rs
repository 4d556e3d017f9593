// src/ingest/mod.rs
pub mod config;
pub mod position;
pub mod providers;
pub mod retry;
pub mod scheduler;
pub mod types;

use std::cmp::Ordering;
use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{IngestError, Result};
use crate::ingest::position::{compare_positions, order_value, parse_event_time, same_shape};
use crate::ingest::types::{Event, EventSink, PageQuery, RecordFetcher, Source};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_cycles_total", "Poll cycles started, per source.");
        describe_counter!(
            "feed_events_emitted_total",
            "Events handed to the sink."
        );
        describe_counter!(
            "feed_cycle_errors_total",
            "Poll cycles that ended in an error."
        );
        describe_counter!(
            "feed_fetch_errors_total",
            "Page requests that failed after retries."
        );
        describe_counter!(
            "feed_checkpoint_advances_total",
            "Cycles that moved a checkpoint forward."
        );
        describe_counter!(
            "feed_runs_total",
            "Scheduled runs over all sources."
        );
        describe_histogram!("feed_fetch_ms", "Page fetch time in milliseconds.");
        describe_gauge!("feed_last_run_ts", "Unix ts when the last run finished.");
    });
}

/// How a single poll cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Records were emitted and the checkpoint moved from `from` to `to`.
    Advanced {
        emitted: usize,
        from: String,
        to: String,
    },
    /// Nothing newer than `position`; checkpoint untouched.
    Unchanged { emitted: usize, position: String },
    /// Shutdown was requested between records; checkpoint untouched.
    Cancelled { emitted: usize, position: String },
}

impl CycleOutcome {
    pub fn emitted(&self) -> usize {
        match self {
            CycleOutcome::Advanced { emitted, .. }
            | CycleOutcome::Unchanged { emitted, .. }
            | CycleOutcome::Cancelled { emitted, .. } => *emitted,
        }
    }

    /// Checkpoint value after the cycle.
    pub fn position(&self) -> &str {
        match self {
            CycleOutcome::Advanced { to, .. } => to,
            CycleOutcome::Unchanged { position, .. } | CycleOutcome::Cancelled { position, .. } => {
                position
            }
        }
    }
}

/// Run one poll cycle for `source`: read checkpoint, fetch one page, emit
/// every record in order, then advance the checkpoint once to the largest
/// position seen and flush it to disk.
///
/// The filter is a strict `>` on the ordering field. Records sharing the exact
/// checkpoint value are therefore never redelivered, and records that share a
/// timestamp with the last record of a full page can be skipped if the field
/// lacks resolution. Switching to `>=` would trade that for duplicates.
///
/// Any error leaves the checkpoint where it was; records already handed to
/// the sink stay emitted and will be delivered again next cycle. A failed
/// flush surfaces as `StoreWrite`; the advance stays in memory and is written
/// by the next successful flush or close.
pub async fn run_cycle(
    source: &Source,
    store: &CheckpointStore,
    fetcher: &dyn RecordFetcher,
    sink: &dyn EventSink,
    cancel: &CancellationToken,
) -> Result<CycleOutcome> {
    ensure_metrics_described();
    counter!("feed_cycles_total").increment(1);

    let position = store.get(&source.name, &source.default_checkpoint);
    info!(source = %source.name, position = %position, "requesting source since checkpoint");

    let query = PageQuery {
        url: &source.url,
        order_field: &source.order_field,
        since: &position,
        limit: source.limit,
    };
    let page = fetcher.fetch(&query).await?;
    debug!(source = %source.name, fetcher = fetcher.name(), records = page.len(), "page fetched");

    let mut max_seen: Option<String> = None;
    let mut emitted = 0usize;

    for record in page {
        if cancel.is_cancelled() {
            info!(source = %source.name, emitted, "shutdown requested, checkpoint left in place");
            return Ok(CycleOutcome::Cancelled { emitted, position });
        }

        let value = order_value(&record, &source.order_field)?;
        let time = parse_event_time(&value, source.naive_tz).ok_or_else(|| {
            IngestError::InvalidTimestamp {
                field: source.order_field.clone(),
                value: value.clone(),
            }
        })?;

        sink.emit(&Event::new(&source.name, time, record))?;
        emitted += 1;
        counter!("feed_events_emitted_total").increment(1);

        max_seen = match max_seen {
            Some(prev) => {
                if compare_positions(&value, &prev) == Ordering::Less {
                    warn!(
                        source = %source.name,
                        value = %value,
                        previous = %prev,
                        "records arrived out of order"
                    );
                    Some(prev)
                } else {
                    Some(value)
                }
            }
            None => Some(value),
        };
    }

    match max_seen {
        Some(newest) if compare_positions(&newest, &position) == Ordering::Greater => {
            if !same_shape(&newest, &position) {
                warn!(
                    source = %source.name,
                    position = %position,
                    newest = %newest,
                    "checkpoint and fetched values differ in precision or timezone; string ordering may be wrong"
                );
            }
            info!(source = %source.name, position = %newest, "moving checkpoint");
            store.set(&source.name, &newest)?;
            store.flush()?;
            counter!("feed_checkpoint_advances_total").increment(1);
            Ok(CycleOutcome::Advanced {
                emitted,
                from: position,
                to: newest,
            })
        }
        _ => {
            debug!(source = %source.name, emitted, "checkpoint unchanged");
            Ok(CycleOutcome::Unchanged { emitted, position })
        }
    }
}

/// Totals across one run over all configured sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub events: usize,
}

impl RunSummary {
    fn record(&mut self, source: &Source, store: &CheckpointStore, result: Result<CycleOutcome>) {
        match result {
            Ok(CycleOutcome::Cancelled { emitted, .. }) => {
                self.cancelled += 1;
                self.events += emitted;
            }
            Ok(outcome) => {
                self.succeeded += 1;
                self.events += outcome.emitted();
            }
            Err(e) => {
                self.failed += 1;
                counter!("feed_cycle_errors_total").increment(1);
                let position = store.get(&source.name, &source.default_checkpoint);
                error!(
                    source = %source.name,
                    position = %position,
                    error = %e,
                    "poll cycle failed; will resume from the same checkpoint"
                );
            }
        }
    }
}

/// Drives poll cycles for a set of sources against one checkpoint store.
#[derive(Clone)]
pub struct Ingester {
    store: Arc<CheckpointStore>,
    fetcher: Arc<dyn RecordFetcher>,
    sink: Arc<dyn EventSink>,
    max_concurrency: usize,
}

impl Ingester {
    pub fn new(
        store: Arc<CheckpointStore>,
        fetcher: Arc<dyn RecordFetcher>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            fetcher,
            sink,
            max_concurrency: 1,
        }
    }

    /// Sources run one at a time unless raised; values below 1 mean 1.
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    pub async fn run_cycle(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome> {
        run_cycle(
            source,
            &self.store,
            self.fetcher.as_ref(),
            self.sink.as_ref(),
            cancel,
        )
        .await
    }

    /// One cycle per source. A failing source is logged and skipped; it
    /// never stops the others.
    pub async fn run_all(&self, sources: &[Source], cancel: &CancellationToken) -> RunSummary {
        let summary = if self.max_concurrency <= 1 {
            self.run_sequential(sources, cancel).await
        } else {
            self.run_concurrent(sources, cancel).await
        };

        gauge!("feed_last_run_ts").set(chrono::Utc::now().timestamp().max(0) as f64);
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            events = summary.events,
            "ingest run finished"
        );
        summary
    }

    async fn run_sequential(&self, sources: &[Source], cancel: &CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();
        for source in sources {
            if cancel.is_cancelled() {
                summary.cancelled += 1;
                continue;
            }
            let result = self.run_cycle(source, cancel).await;
            summary.record(source, &self.store, result);
        }
        summary
    }

    async fn run_concurrent(&self, sources: &[Source], cancel: &CancellationToken) -> RunSummary {
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for source in sources.iter().cloned() {
            let this = self.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                if cancel.is_cancelled() {
                    return (source, None);
                }
                let result = this.run_cycle(&source, &cancel).await;
                (source, Some(result))
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, None)) => summary.cancelled += 1,
                Ok((source, Some(result))) => summary.record(&source, &self.store, result),
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "poll task aborted");
                }
            }
        }
        summary
    }
}
