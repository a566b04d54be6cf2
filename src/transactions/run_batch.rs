use std::fmt;

use futures::{StreamExt as _, stream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    catalog::CatalogEntry,
    error::ResolveError,
    transactions::{Context, Resolved, resolve_entry},
};

/// The outcome of one catalog entry.
#[derive(Debug)]
pub struct Outcome {
    /// The resolved entry.
    pub entry: CatalogEntry,
    /// The cached artifact, or why there is none.
    pub result: Result<Resolved, ResolveError>,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(resolved) => write!(
                f,
                "{}: {} ({})",
                self.entry,
                resolved.download_url(),
                resolved.cached.state()
            ),
            Err(err) => write!(f, "{}: {}: {err}", self.entry, err.kind()),
        }
    }
}

/// The outcomes of a batch, in the order the entries were given.
#[derive(Debug)]
pub struct BatchReport {
    /// One outcome per entry.
    pub outcomes: Vec<Outcome>,
}

impl BatchReport {
    /// Returns the outcomes of the resolved entries.
    pub fn succeeded(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    /// Returns the outcomes of the failed entries.
    pub fn failed(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Returns `true` if every entry has been resolved.
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Logs every failure and the aggregate summary.
    pub fn log_summary(&self) {
        for outcome in self.failed() {
            error!("{outcome}");
        }

        let succeeded = self.succeeded().count();
        let hits = self
            .succeeded()
            .filter(|o| o.result.as_ref().is_ok_and(|r| r.cached.is_hit()))
            .count();
        let failed = self.outcomes.len() - succeeded;

        if failed == 0 {
            info!(
                "resolved all {succeeded} entries ({hits} cached, {} uploaded)",
                succeeded - hits
            );
        } else {
            warn!(
                "resolved {succeeded} of {} entries ({hits} cached, {} uploaded), {failed} failed",
                self.outcomes.len(),
                succeeded - hits
            );
        }
    }
}

/// Resolves every entry, at most [`Context::concurrency`] at the same time.
///
/// Entries are independent: the failure of one never stops the others. Once `cancel` is triggered,
/// entries stop at their next step and report [`ResolveError::Cancelled`].
pub async fn run_batch(
    cx: &Context,
    entries: Vec<CatalogEntry>,
    cancel: &CancellationToken,
) -> BatchReport {
    info!(
        "resolving {} entries into {}@{} ({} at a time)…",
        entries.len(),
        cx.cache_repo,
        cx.tag,
        cx.concurrency
    );

    let mut outcomes: Vec<(usize, Outcome)> = stream::iter(entries.into_iter().enumerate())
        .map(|(idx, entry)| async move {
            let result = resolve_entry(cx, &entry, cancel).await;
            match &result {
                Ok(resolved) => info!("resolved {entry}: {}", resolved.download_url()),
                Err(err) => warn!("failed to resolve {entry}: {err}"),
            }
            (idx, Outcome { entry, result })
        })
        .buffer_unordered(cx.concurrency)
        .collect()
        .await;
    outcomes.sort_by_key(|(idx, _)| *idx);

    let report = BatchReport {
        outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
    };
    report.log_summary();
    report
}
