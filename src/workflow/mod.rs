//! Data models of GitHub Actions workflows.

#![cfg(feature = "workflow")]

use std::{fmt::Display, pin::pin};

use chrono::{DateTime, Utc};
use futures::TryStreamExt as _;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    client::{GitHubClient, Page},
    error::TransportError,
    repository::RepoRef,
};

pub mod artifact;

/// The conclusion of a completed workflow run.
#[non_exhaustive]
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    Neutral,
    TimedOut,
    ActionRequired,
    Stale,
    StartupFailure,
    /// A conclusion this crate does not know about yet.
    #[serde(other)]
    Unknown,
}

/// Represents a GitHub Actions workflow run from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: Option<String>,
    pub head_branch: Option<String>,
    pub head_sha: String,
    pub status: Option<String>,
    /// [`None`] while the run is still in progress.
    pub conclusion: Option<Conclusion>,
    pub created_at: DateTime<Utc>,
    pub html_url: Option<String>,
}

impl WorkflowRun {
    /// Returns `true` if the run has completed successfully.
    pub fn is_success(&self) -> bool {
        self.conclusion == Some(Conclusion::Success)
    }

    /// Returns the abbreviated head commit.
    pub fn short_sha(&self) -> &str {
        self.head_sha.get(..7).unwrap_or(&self.head_sha)
    }
}

impl Display for WorkflowRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run {} (SHA: {})", self.id, self.short_sha())
    }
}

/// Represents a page of workflow runs from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowRuns {
    pub total_count: u64,
    pub workflow_runs: Vec<WorkflowRun>,
}

impl Page for WorkflowRuns {
    type Item = WorkflowRun;

    fn into_items(self) -> Vec<WorkflowRun> {
        self.workflow_runs
    }
}

/// Finds the most recent run of `workflow_file` that concluded with `success`.
///
/// Runs are listed newest first, `per_page` at a time, and at most `max_pages` pages are scanned.
/// Runs still in progress and runs with any other conclusion are skipped. An unknown workflow, a
/// workflow without runs and a window without a successful run all resolve to [`None`].
///
/// # Errors
///
/// Returns a [`TransportError`] if listing the runs fails.
pub async fn latest_successful_run(
    client: &GitHubClient,
    repo: &RepoRef,
    workflow_file: &str,
    per_page: u8,
    max_pages: usize,
) -> Result<Option<WorkflowRun>, TransportError> {
    let path = format!("repos/{repo}/actions/workflows/{workflow_file}/runs");
    debug!("looking for the latest successful run at {path}…");

    let params = [
        ("per_page", per_page.to_string()),
        ("exclude_pull_requests", String::from("true")),
    ];
    let mut pages = pin!(client.pages::<WorkflowRuns>(&path, &params));
    let mut scanned = 0;

    while scanned < max_pages {
        let Some(runs) = pages.try_next().await? else {
            break;
        };
        scanned += 1;

        for run in runs {
            match run.conclusion {
                Some(Conclusion::Success) => {
                    info!("found {run} of {repo} ({workflow_file})");
                    return Ok(Some(run));
                }
                None => debug!("skipping {run}: still in progress"),
                Some(conclusion) => debug!("skipping {run}: {conclusion:?}"),
            }
        }
    }

    info!("no successful run of {repo} ({workflow_file}) within {scanned} page(s)");
    Ok(None)
}
