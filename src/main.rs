//! feed-ingest: host-invoked entrypoint.
//!
//! Without flags it reads the host's input definition from stdin and writes an
//! XML event stream to stdout. `--config` switches to a local TOML/JSON file,
//! and `--interval-secs` keeps polling until Ctrl-C.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_ingest::host::{self, XmlEventWriter};
use feed_ingest::ingest::config::{load_config_default, load_config_from};
use feed_ingest::ingest::providers::SodaFetcher;
use feed_ingest::ingest::scheduler::{spawn_scheduler, IngestSchedulerCfg};
use feed_ingest::{CheckpointStore, ConfigSource, Ingester};

#[derive(Parser, Debug)]
#[command(name = "feed-ingest", version, about = "Incremental polling of SODA-style data feeds")]
struct Cli {
    /// Print the input scheme and exit.
    #[arg(long)]
    scheme: bool,

    /// Accept the host's validation request (validation is not external).
    #[arg(long)]
    validate_arguments: bool,

    /// Read sources from a TOML/JSON file instead of stdin.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the default config lookup ($FEED_SOURCES_PATH, config/sources.*).
    #[arg(long, conflicts_with = "config")]
    standalone: bool,

    /// Overrides the checkpoint directory from the config or host input.
    #[arg(long, env = "FEED_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Poll repeatedly at this interval instead of once.
    #[arg(long)]
    interval_secs: Option<u64>,

    #[arg(long, default_value_t = 1)]
    max_concurrency: usize,
}

/// Logs go to stderr; stdout carries the event stream only.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feed_ingest=info,warn"));
    let json = std::env::var("FEED_LOG_JSON").ok().is_some_and(|v| v == "1");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().compact().with_writer(std::io::stderr)))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if cli.scheme {
        print!("{}", host::SCHEME);
        return Ok(ExitCode::SUCCESS);
    }
    if cli.validate_arguments {
        let mut sink = String::new();
        std::io::stdin()
            .read_to_string(&mut sink)
            .context("reading validation request")?;
        return Ok(ExitCode::SUCCESS);
    }

    let (sources, config_dir) = if let Some(path) = &cli.config {
        let cfg = load_config_from(path)?;
        (cfg.list_sources()?, cfg.checkpoint_dir.clone())
    } else if cli.standalone {
        let cfg = load_config_default()?;
        (cfg.list_sources()?, cfg.checkpoint_dir.clone())
    } else {
        let input = host::read_input(std::io::stdin().lock())?;
        (input.list_sources()?, Some(input.checkpoint_dir.clone()))
    };

    let checkpoint_dir = cli
        .checkpoint_dir
        .or(config_dir)
        .unwrap_or_else(|| PathBuf::from("state"));

    let store = match CheckpointStore::in_dir(&checkpoint_dir) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "cannot open checkpoint store");
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(sources = sources.len(), store = %store.path().display(), "starting ingest");

    let writer = Arc::new(XmlEventWriter::new(std::io::stdout()));
    let ingester = Ingester::new(store.clone(), Arc::new(SodaFetcher::new()), writer.clone())
        .with_max_concurrency(cli.max_concurrency);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    match cli.interval_secs {
        Some(interval_secs) => {
            let cfg = IngestSchedulerCfg { interval_secs };
            spawn_scheduler(cfg, ingester, sources, cancel)
                .await
                .context("scheduler task")?;
        }
        None => {
            ingester.run_all(&sources, &cancel).await;
        }
    }

    writer.finish().context("closing event stream")?;
    if let Err(e) = store.close() {
        error!(error = %e, "checkpoint store flush failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
