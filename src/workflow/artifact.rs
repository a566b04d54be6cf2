//! Artifacts from GitHub REST API and related functions.

use std::{fmt::Display, pin::pin};

use futures::TryStreamExt as _;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    client::{GitHubClient, Page},
    error::{NotFound, TransportError},
    repository::RepoRef,
};

/// Represents artifacts from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct Artifacts {
    pub total_count: u64,
    pub artifacts: Vec<Artifact>,
}

impl Page for Artifacts {
    type Item = Artifact;

    fn into_items(self) -> Vec<Artifact> {
        self.artifacts
    }
}

/// Represents an artifact from GitHub REST API.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
    pub size_in_bytes: u64,
    pub archive_download_url: String,
    pub expired: bool,
    pub created_at: Option<String>,
    pub expires_at: Option<String>,
    /// The checksum of the archive, as `sha256:<hex>`.
    pub digest: Option<String>,
}

impl Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {} bytes)", self.name, self.id, self.size_in_bytes)
    }
}

/// Lists the live artifacts of a workflow run in listing order, skipping expired ones.
///
/// # Errors
///
/// Returns a [`TransportError`] if listing the artifacts fails.
pub async fn artifacts_for_run(
    client: &GitHubClient,
    repo: &RepoRef,
    run_id: u64,
    per_page: u8,
) -> Result<Vec<Artifact>, TransportError> {
    let path = format!("repos/{repo}/actions/runs/{run_id}/artifacts");
    debug!("fetching artifacts from {path}…");

    let params = [("per_page", per_page.to_string())];
    let mut pages = pin!(client.pages::<Artifacts>(&path, &params));
    let mut artifacts = Vec::new();

    while let Some(page) = pages.try_next().await? {
        for artifact in page {
            if artifact.expired {
                debug!("skipping expired artifact {artifact}");
            } else {
                artifacts.push(artifact);
            }
        }
    }

    match artifacts.len() {
        1 => info!("fetched 1 artifact from {path}"),
        count => info!("fetched {count} artifacts from {path}"),
    }
    Ok(artifacts)
}

/// Selects the artifact named exactly `name` from the live artifacts of run `run_id`.
///
/// The match is case-sensitive. Should several artifacts share the name, the first in listing order
/// wins.
///
/// # Errors
///
/// Returns [`NotFound::NoArtifacts`] if the run has no artifacts at all, and
/// [`NotFound::NoMatchingArtifact`] if none of them carries the name.
pub fn select_artifact(
    artifacts: Vec<Artifact>,
    name: &str,
    run_id: u64,
) -> Result<Artifact, NotFound> {
    if artifacts.is_empty() {
        return Err(NotFound::NoArtifacts { run_id });
    }

    let available: Vec<String> = artifacts.iter().map(|a| a.name.clone()).collect();
    let mut matching = artifacts.into_iter().filter(|a| a.name == name);

    let Some(artifact) = matching.next() else {
        return Err(NotFound::NoMatchingArtifact {
            name: name.to_owned(),
            available,
        });
    };

    let duplicates = matching.count();
    if duplicates > 0 {
        warn!(
            "run {run_id} has {} artifacts named {name}, using the first one ({})",
            duplicates + 1,
            artifact.id
        );
    }

    Ok(artifact)
}
