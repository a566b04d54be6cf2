//! Repository references and the lookup of the repository hosting the cache release.

#![cfg(feature = "workflow")]

use std::{fmt, str::FromStr};

use reqwest::Method;
use serde::{Deserialize, Deserializer, de};
use thiserror::Error;
use tracing::{info, warn};

use crate::{client::GitHubClient, error::TransportError};

/// An `owner/name` reference to a GitHub repository.
///
/// Both parts are non-empty and consist of ASCII letters, digits, `_`, `.` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoRef(String);

/// A string that is not a valid `owner/name` reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid repository reference '{0}', expected owner/name")]
pub struct InvalidRepoRef(pub String);

impl RepoRef {
    /// Returns the owner part.
    pub fn owner(&self) -> &str {
        self.0.split_once('/').map_or("", |(owner, _)| owner)
    }

    /// Returns the name part.
    pub fn name(&self) -> &str {
        self.0.split_once('/').map_or("", |(_, name)| name)
    }

    /// Returns the reference as `owner/name`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RepoRef {
    type Err = InvalidRepoRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid_part = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        };

        match s.split_once('/') {
            Some((owner, name)) if valid_part(owner) && valid_part(name) => Ok(Self(s.to_owned())),
            _ => Err(InvalidRepoRef(s.to_owned())),
        }
    }
}

impl<'de> Deserialize<'de> for RepoRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents a repository from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub id: u64,
    pub full_name: String,
    pub default_branch: Option<String>,
    pub permissions: Option<Permissions>,
}

/// The permissions of the authenticated user on a [`Repository`].
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct Permissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub pull: bool,
}

/// Why the repository hosting the cache release could not be determined.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RepositoryContextError {
    /// Neither the configuration nor `GITHUB_REPOSITORY` names a repository.
    #[error("no cache repository configured and GITHUB_REPOSITORY is not set")]
    Unconfigured,
    /// The configured name is not an `owner/name` reference.
    #[error(transparent)]
    Invalid(#[from] InvalidRepoRef),
    /// The repository does not exist or is not visible with the current credential.
    #[error("cache repository {0} does not exist or is not accessible")]
    Missing(RepoRef),
    /// The lookup itself failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Fetches a repository, returning [`None`] if it does not exist.
///
/// # Errors
///
/// Returns a [`TransportError`] if the lookup fails.
pub async fn fetch_repository(
    client: &GitHubClient,
    repo: &RepoRef,
) -> Result<Option<Repository>, TransportError> {
    client
        .request(Method::GET, &format!("repos/{repo}"), &[], None)
        .await?
        .json_if_found()
}

/// Determines the repository hosting the cache release.
///
/// `configured` usually comes from [`Config`](crate::config::Config), which falls back to
/// `GITHUB_REPOSITORY`. The repository is looked up to canonicalize its name; a credential without
/// push permission is reported as a warning, since uploads will be refused later.
///
/// # Errors
///
/// Returns a [`RepositoryContextError`] if no valid, accessible repository is named.
pub async fn resolve_cache_repo(
    client: &GitHubClient,
    configured: Option<&str>,
) -> Result<RepoRef, RepositoryContextError> {
    let repo: RepoRef = configured
        .ok_or(RepositoryContextError::Unconfigured)?
        .parse()?;

    let Some(repository) = fetch_repository(client, &repo).await? else {
        return Err(RepositoryContextError::Missing(repo));
    };

    match repository.permissions {
        Some(permissions) if client.is_authenticated() && !permissions.push => {
            warn!("the GitHub token cannot push to {}, uploads will be refused", repository.full_name)
        }
        _ => {}
    }

    let canonical = repository.full_name.parse().unwrap_or(repo);
    info!("caching artifacts in {canonical}");
    Ok(canonical)
}
