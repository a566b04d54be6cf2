//! Errors raised while talking to the GitHub REST API and while resolving catalog entries.
//!
//! [`TransportError`] describes a single failed HTTP exchange and knows whether retrying it makes
//! sense. [`ResolveError`] is what a catalog entry ends with when it cannot be resolved; its
//! [`ErrorKind`] is what the batch report shows.

#![cfg(feature = "workflow")]

use std::{fmt, time::Duration};

use reqwest::{Method, StatusCode};
use thiserror::Error;

use crate::framework::{State, Stateful};

/// A failed HTTP exchange with the GitHub REST API.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never produced a response, or the response body could not be read.
    #[error("{method} {url} failed: {source}")]
    Network {
        /// The method of the request.
        method: Method,
        /// The requested url.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The API answered with a status that is neither successful nor `404 Not Found`.
    #[error("{method} {url} returned {status}: {message}")]
    Status {
        /// The method of the request.
        method: Method,
        /// The requested url.
        url: String,
        /// The returned status.
        status: StatusCode,
        /// The `message` of the error payload, or the canonical reason.
        message: String,
        /// The delay hinted by `Retry-After` or `x-ratelimit-reset`.
        retry_after: Option<Duration>,
        /// Whether the response reports an exhausted primary or secondary rate limit.
        rate_limited: bool,
    },
    /// The response body does not match the expected record.
    #[error("failed to parse data from {url}: {source}")]
    Decode {
        /// The requested url.
        url: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// The transferred bytes are not what the API announced.
    #[error("broken transfer from {url}: {reason}")]
    Integrity {
        /// The requested url.
        url: String,
        /// What did not match.
        reason: String,
    },
}

impl TransportError {
    /// Returns the HTTP status of the response, if any arrived.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network { source, .. } => source.status(),
            Self::Decode { .. } | Self::Integrity { .. } => None,
        }
    }

    /// Returns `true` if the API refused to create something because it already exists.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::UNPROCESSABLE_ENTITY)
    }

    /// Returns `true` if the credential is missing or lacks the required permission.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Status {
                status,
                rate_limited,
                ..
            } => {
                *status == StatusCode::UNAUTHORIZED
                    || (*status == StatusCode::FORBIDDEN && !rate_limited)
            }
            _ => false,
        }
    }
}

impl Stateful for TransportError {
    fn state(&self) -> State {
        match self {
            Self::Network { source, .. }
                if source.is_builder() || source.is_redirect() || source.is_decode() =>
            {
                State::Stop
            }
            // Refused, reset or dropped connections, timeouts and broken bodies.
            Self::Network { .. } => State::Retry { after: None },
            Self::Decode { .. } => State::Stop,
            Self::Status {
                status,
                retry_after,
                rate_limited,
                ..
            } => match *status {
                status if status.is_server_error() => State::Retry {
                    after: *retry_after,
                },
                StatusCode::TOO_MANY_REQUESTS => State::Retry {
                    after: *retry_after,
                },
                StatusCode::FORBIDDEN if *rate_limited => State::Retry {
                    after: *retry_after,
                },
                _ => State::Stop,
            },
            Self::Integrity { .. } => State::Retry { after: None },
        }
    }
}

/// The step of a resolution at which it stopped.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Looking the cache repository up.
    RepositoryLookup,
    /// Looking the latest successful workflow run up.
    RunLookup,
    /// Listing the artifacts of the run.
    ArtifactListing,
    /// Looking the cache release up.
    ReleaseLookup,
    /// Creating the missing cache release.
    ReleaseCreation,
    /// Listing the assets of the cache release.
    AssetListing,
    /// Downloading the artifact archive.
    Download,
    /// Uploading the archive to the cache release.
    Upload,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RepositoryLookup => "repository lookup",
            Self::RunLookup => "run lookup",
            Self::ArtifactListing => "artifact listing",
            Self::ReleaseLookup => "release lookup",
            Self::ReleaseCreation => "release creation",
            Self::AssetListing => "asset listing",
            Self::Download => "download",
            Self::Upload => "upload",
        })
    }
}

/// An expected absence that ends the resolution of one entry.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFound {
    /// The workflow has no run concluded with `success` within the scanned window.
    #[error("no successful run")]
    NoSuccessfulRun,
    /// The run has no live artifacts at all.
    #[error("no artifacts in run {run_id}")]
    NoArtifacts {
        /// The id of the run.
        run_id: u64,
    },
    /// The run has artifacts, none of them with the requested name.
    #[error("no artifact named {name} (available: {})", .available.join(", "))]
    NoMatchingArtifact {
        /// The requested name.
        name: String,
        /// The names the run does provide.
        available: Vec<String>,
    },
    /// The cache release does not exist and creating it was not requested.
    #[error("no release tagged {tag} in {repo}")]
    NoRelease {
        /// The cache repository.
        repo: String,
        /// The tag of the cache release.
        tag: String,
    },
}

/// The taxonomy kind of a [`ResolveError`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Something expected is absent.
    NotFound,
    /// The network or the API failed, retries included.
    Transport,
    /// Writing was attempted without a sufficient credential.
    Authorization,
    /// An asset name collision that could not be settled.
    Conflict,
    /// The batch was shut down before the entry finished.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not found",
            Self::Transport => "transport error",
            Self::Authorization => "authorization error",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Why a catalog entry could not be resolved.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Something the resolution depends on does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFound),
    /// The API could not be reached or kept failing.
    #[error("{step} failed: {source}")]
    Transport {
        /// The step that failed.
        step: Step,
        /// The last transport failure.
        #[source]
        source: TransportError,
    },
    /// The step needs write permission the credential does not grant.
    #[error("{step} requires write access: {reason}")]
    Authorization {
        /// The step that was refused.
        step: Step,
        /// Why access was refused.
        reason: String,
    },
    /// Another upload of the same asset name interfered and the asset could not be confirmed.
    #[error("asset {name} is claimed by another upload that never finished")]
    Conflict {
        /// The contended asset name.
        name: String,
    },
    /// The batch was cancelled.
    #[error("cancelled before {step}")]
    Cancelled {
        /// The step that was not started.
        step: Step,
    },
}

impl ResolveError {
    /// Wraps a [`TransportError`] that ended `step`, telling refused writes apart from failures.
    pub fn transport(step: Step) -> impl FnOnce(TransportError) -> Self {
        move |source| {
            if source.is_unauthorized() {
                Self::Authorization {
                    step,
                    reason: source.to_string(),
                }
            } else {
                Self::Transport { step, source }
            }
        }
    }

    /// Returns the taxonomy kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: StatusCode, rate_limited: bool) -> TransportError {
        TransportError::Status {
            method: Method::GET,
            url: String::from("https://api.github.com/repos/org/app"),
            status,
            message: String::from("nope"),
            retry_after: Some(Duration::from_secs(7)),
            rate_limited,
        }
    }

    #[test]
    fn server_errors_and_rate_limits_are_retried() {
        let after = Some(Duration::from_secs(7));

        assert_eq!(
            status(StatusCode::BAD_GATEWAY, false).state(),
            State::Retry { after }
        );
        assert_eq!(
            status(StatusCode::TOO_MANY_REQUESTS, false).state(),
            State::Retry { after }
        );
        assert_eq!(
            status(StatusCode::FORBIDDEN, true).state(),
            State::Retry { after }
        );
    }

    #[test]
    fn client_errors_stop() {
        assert_eq!(status(StatusCode::BAD_REQUEST, false).state(), State::Stop);
        assert_eq!(status(StatusCode::FORBIDDEN, false).state(), State::Stop);
        assert_eq!(
            status(StatusCode::UNPROCESSABLE_ENTITY, false).state(),
            State::Stop
        );
    }

    #[test]
    fn refused_writes_are_authorization_errors() {
        let err = ResolveError::transport(Step::Upload)(status(StatusCode::FORBIDDEN, false));
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = ResolveError::transport(Step::Upload)(status(StatusCode::FORBIDDEN, true));
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn not_found_names_the_alternatives() {
        let err = ResolveError::from(NotFound::NoMatchingArtifact {
            name: String::from("App.ipa"),
            available: vec![String::from("app.ipa"), String::from("logs")],
        });

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            "no artifact named App.ipa (available: app.ipa, logs)"
        );
    }
}
