//! Pre-made transactions.

#![cfg(feature = "transactions")]

mod download_artifact;
mod resolve_entry;
mod run_batch;

pub use download_artifact::*;
pub use resolve_entry::*;
pub use run_batch::*;

use std::fmt;

use anyhow::Context as _;
use tracing::info;

use crate::{
    client::GitHubClient,
    config::Config,
    framework::KeyedLocks,
    repository::{RepoRef, resolve_cache_repo},
};

/// Identifies an asset in a cache release. Check-then-upload is serialized per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetKey {
    /// The repository hosting the cache release.
    pub repo: RepoRef,
    /// The tag of the cache release.
    pub tag: String,
    /// The name of the asset.
    pub name: String,
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.repo, self.tag, self.name)
    }
}

/// The context shared by every resolution of a batch: the client and where artifacts are cached.
#[derive(Debug)]
pub struct Context {
    /// The API client.
    pub client: GitHubClient,
    /// The repository hosting the cache release.
    pub cache_repo: RepoRef,
    /// The tag of the cache release.
    pub tag: String,
    /// Whether a missing cache release is created.
    pub create_release: bool,
    /// How many entries are resolved at the same time.
    pub concurrency: usize,
    /// The page size of every listing.
    pub per_page: u8,
    /// How many pages of workflow runs are scanned for a successful run.
    pub run_scan_pages: usize,
    locks: KeyedLocks<AssetKey>,
}

impl Context {
    /// Creates a [`Context`], looking up the repository hosting the cache release.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the cache repository cannot be determined.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        if !config.can_write() {
            info!("resolving read-only, cache misses are reported instead of uploaded");
        }
        let client = config.client().context("failed to create the GitHub client")?;
        let cache_repo = resolve_cache_repo(&client, config.cache_repo.as_deref())
            .await
            .context("failed to determine the cache repository")?;

        Ok(Self::with_client(config, client, cache_repo))
    }

    /// Creates a [`Context`] caching into `cache_repo` without looking it up.
    pub fn with_client(config: &Config, client: GitHubClient, cache_repo: RepoRef) -> Self {
        Self {
            client,
            cache_repo,
            tag: config.tag.clone(),
            create_release: config.create_release,
            concurrency: config.concurrency.max(1),
            per_page: config.per_page.max(1),
            run_scan_pages: config.run_scan_pages.max(1),
            locks: KeyedLocks::new(),
        }
    }

    /// Returns `true` if uploads can be attempted.
    pub fn can_write(&self) -> bool {
        self.client.is_authenticated()
    }
}
