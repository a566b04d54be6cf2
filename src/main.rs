//! Resolves the latest successful CI artifact of every catalog app and caches it in a release.

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context as _;
use artifact_cache::{
    catalog::{CatalogEntry, load_catalog},
    config::Config,
    shutdown,
    transactions::{Context, run_batch},
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Resolves and caches the latest successful CI artifact of catalog apps.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// An `apps.json` catalog to read. May be repeated.
    #[arg(long = "catalog", value_name = "FILE")]
    catalogs: Vec<PathBuf>,

    /// An extra entry as `owner/repo,workflow_file,artifact_name[,name]`. May be repeated.
    #[arg(long = "entry", value_name = "ENTRY")]
    entries: Vec<CatalogEntry>,

    /// The repository hosting the cache release. Defaults to GITHUB_REPOSITORY.
    #[arg(long, env = "ARTIFACT_CACHE_REPO")]
    cache_repo: Option<String>,

    /// The tag of the cache release. Defaults to ARTIFACT_CACHE_TAG or `app-artifacts`.
    #[arg(long)]
    tag: Option<String>,

    /// How many entries are resolved at the same time.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Fails entries instead of creating a missing cache release.
    #[arg(long)]
    no_create_release: bool,

    /// Logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(cache_repo) = &self.cache_repo {
            config.cache_repo = Some(cache_repo.clone());
        }
        if let Some(tag) = &self.tag {
            config.tag = tag.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency.max(1);
        }
        config.create_release = !self.no_create_release;
        config
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let mut entries = Vec::new();
    for path in &args.catalogs {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            entries.extend(load_catalog(path).await?);
        } else {
            warn!("catalog {} not found, skipping", path.display());
        }
    }
    entries.extend(args.entries.iter().cloned());

    if entries.is_empty() {
        warn!("nothing to resolve");
        return Ok(true);
    }

    let config = args.config();
    let cx = Context::new(&config)
        .await
        .context("failed to prepare the batch")?;

    let cancel = CancellationToken::new();
    let watcher = shutdown::cancel_on_signal(cancel.clone());
    let report = run_batch(&cx, entries, &cancel).await;
    cancel.cancel();
    drop(watcher.await);

    for outcome in report.succeeded() {
        info!("{outcome}");
    }
    Ok(report.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.json_logs);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
