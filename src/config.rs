//! The configuration of a batch run.

#![cfg(feature = "workflow")]

use tracing::warn;

use crate::{
    client::GitHubClient,
    env::{CACHE_TAG, CONCURRENCY, GITHUB_API_URL, GITHUB_REPOSITORY, GITHUB_TOKEN},
    framework::RetryPolicy,
};

/// Everything a batch run needs to know, read once and passed down explicitly.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// The base url of the GitHub REST API.
    pub api_url: String,
    /// The bearer credential. Without it uploads are disabled.
    pub token: Option<String>,
    /// The repository hosting the cache release. [`Config::from_env`] takes `GITHUB_REPOSITORY`.
    pub cache_repo: Option<String>,
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
    /// The retry policy of every API call.
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("cache_repo", &self.cache_repo)
            .field("tag", &self.tag)
            .field("create_release", &self.create_release)
            .field("concurrency", &self.concurrency)
            .field("per_page", &self.per_page)
            .field("run_scan_pages", &self.run_scan_pages)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: String::from("https://api.github.com"),
            token: None,
            cache_repo: None,
            tag: String::from("app-artifacts"),
            create_release: true,
            concurrency: 4,
            per_page: 30,
            run_scan_pages: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Reads the configuration from the environment.
    ///
    /// See: [`crate::env`]
    pub fn from_env() -> Self {
        Self {
            api_url: GITHUB_API_URL.clone(),
            token: GITHUB_TOKEN.clone(),
            cache_repo: GITHUB_REPOSITORY.clone(),
            tag: CACHE_TAG.clone(),
            concurrency: *CONCURRENCY,
            retry: RetryPolicy::from_env(),
            ..Self::default()
        }
    }

    /// Returns `true` if the configuration allows writing to the cache release.
    ///
    /// Logs a warning otherwise, so a missing credential surfaces before any upload is attempted.
    pub fn can_write(&self) -> bool {
        if self.token.is_none() {
            warn!("GITHUB_TOKEN is not set, uploads are disabled: cached assets can be read, cache misses fail");
            false
        } else {
            true
        }
    }

    /// Creates the API client described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be initialized.
    pub fn client(&self) -> reqwest::Result<GitHubClient> {
        GitHubClient::new(&self.api_url, self.token.clone(), self.retry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_prints_the_token() {
        let config = Config {
            token: Some(String::from("ghp_secret")),
            ..Config::default()
        };

        let printed = format!("{config:?}");
        assert!(!printed.contains("ghp_secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn the_running_repository_hosts_the_cache() {
        assert_eq!(Config::from_env().cache_repo, *GITHUB_REPOSITORY);
        assert_eq!(Config::default().cache_repo, None);
    }

    #[test]
    fn writing_needs_a_token() {
        assert!(!Config::default().can_write());
        assert!(
            Config {
                token: Some(String::from("ghp_secret")),
                ..Config::default()
            }
            .can_write()
        );
    }
}
