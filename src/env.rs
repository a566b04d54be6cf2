//! Defines the environment variables to use.

#![cfg(feature = "env")]

use crate::static_lazy_lock;

use std::{env, time::Duration};

/// Parses an environment variable from [`String`] to something else, wrapping any error in [`anyhow::Error`].
#[macro_export]
macro_rules! parse_env {
    ($key:expr => |$var:ident| $expr:expr) => {
        std::env::var($key)
            .map_err(|e| anyhow::anyhow!(e))
            .and_then(|$var| $expr)
    };
    ($key:expr => |$var:ident| $expr:expr; anyhow) => {
        $crate::parse_env!($key => |$var| $expr.map_err(|e| anyhow::anyhow!(e)))
    };
}

pub use parse_env;

/// Reads an environment variable, treating an empty or blank value as unset.
fn non_blank(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(feature = "env_github_token")]
static_lazy_lock! {
    /// The GitHub token. Without it every request is unauthenticated and uploads are disabled.
    pub GITHUB_TOKEN: Option<String> = non_blank("GITHUB_TOKEN");
}

#[cfg(feature = "env_github_token")]
static_lazy_lock! {
    /// The base url of the GitHub REST API.
    pub GITHUB_API_URL: String = non_blank("GITHUB_API_URL")
        .unwrap_or_else(|| String::from("https://api.github.com"));
}

#[cfg(feature = "env_github_token")]
static_lazy_lock! {
    /// The repository running this tool, as set by GitHub Actions. Hosts the cache release unless overridden.
    pub GITHUB_REPOSITORY: Option<String> = non_blank("GITHUB_REPOSITORY");
}

#[cfg(feature = "env_max_retries")]
static_lazy_lock! {
    /// The maximum retry limit for transactions.
    pub MAX_RETRIES: u8 = parse_env!("MAX_RETRIES" => |s| s.parse::<u8>(); anyhow).unwrap_or(5);
}

#[cfg(feature = "env_max_retries")]
static_lazy_lock! {
    /// The timeout applied to every single HTTP call.
    pub REQUEST_TIMEOUT: Duration = parse_env!("REQUEST_TIMEOUT_SECS" => |s| s.parse::<u64>(); anyhow)
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30));
}

static_lazy_lock! {
    /// The tag of the release used as the artifact cache.
    pub CACHE_TAG: String = non_blank("ARTIFACT_CACHE_TAG")
        .unwrap_or_else(|| String::from("app-artifacts"));
}

static_lazy_lock! {
    /// How many catalog entries are resolved at the same time.
    pub CONCURRENCY: usize = parse_env!("ARTIFACT_CACHE_CONCURRENCY" => |s| s.parse::<usize>(); anyhow)
        .ok()
        .filter(|n| *n > 0)
        .unwrap_or(4);
}
