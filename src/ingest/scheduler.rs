// src/ingest/scheduler.rs
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ingest::types::Source;
use crate::ingest::Ingester;

#[derive(Clone, Copy, Debug)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
}

/// Re-enter the poll loop every `interval_secs` until `cancel` fires.
/// The first run starts immediately; a run in progress finishes its current
/// record before the loop exits.
pub fn spawn_scheduler(
    cfg: IngestSchedulerCfg,
    ingester: Ingester,
    sources: Vec<Source>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(cfg.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let summary = ingester.run_all(&sources, &cancel).await;
            counter!("feed_runs_total").increment(1);

            tracing::info!(
                events = summary.events,
                failed = summary.failed,
                "scheduled ingest tick"
            );
        }
        tracing::info!("scheduler stopped");
    })
}
