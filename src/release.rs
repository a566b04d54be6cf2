//! Releases and release assets from GitHub REST API, used as a cache of artifact archives.

#![cfg(feature = "workflow")]

use std::{fmt::Display, pin::pin};

use futures::TryStreamExt as _;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tokio_util::bytes::Bytes;
use tracing::{debug, info, warn};

use crate::{
    client::{Body, GitHubClient},
    error::TransportError,
    repository::RepoRef,
};

/// Represents a release from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    pub name: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    /// A URI template such as `https://uploads.github.com/repos/o/r/releases/1/assets{?name,label}`.
    pub upload_url: String,
    pub html_url: Option<String>,
}

impl Release {
    /// Returns the upload url without its URI template suffix.
    pub fn upload_endpoint(&self) -> &str {
        self.upload_url
            .split_once('{')
            .map_or(self.upload_url.as_str(), |(endpoint, _)| endpoint)
    }
}

impl Display for Release {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "release {} ({})", self.tag_name, self.id)
    }
}

/// Represents a release asset from GitHub REST API.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub id: u64,
    pub name: String,
    pub size: u64,
    /// `uploaded` once the upload is finalized, `starter` or `open` before.
    pub state: String,
    pub content_type: Option<String>,
    pub browser_download_url: String,
}

impl ReleaseAsset {
    /// Returns `true` if the upload of the asset has been finalized with a non-empty body.
    pub fn is_complete(&self) -> bool {
        self.state == "uploaded" && self.size > 0
    }
}

impl Display for ReleaseAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, {} bytes, {})",
            self.name, self.id, self.size, self.state
        )
    }
}

/// Finds the release tagged `tag`, returning [`None`] if there is none.
///
/// Draft releases are not served by the by-tag endpoint, so a miss there falls back to scanning the
/// release listing page by page.
///
/// # Errors
///
/// Returns a [`TransportError`] if a lookup fails.
pub async fn find_release(
    client: &GitHubClient,
    repo: &RepoRef,
    tag: &str,
    per_page: u8,
) -> Result<Option<Release>, TransportError> {
    debug!("looking for release {tag} in {repo}…");
    let by_tag = client
        .request(
            Method::GET,
            &format!("repos/{repo}/releases/tags/{tag}"),
            &[],
            None,
        )
        .await?;

    if let Some(release) = by_tag.json_if_found::<Release>()? {
        info!("found {release} in {repo}");
        return Ok(Some(release));
    }

    let path = format!("repos/{repo}/releases");
    let params = [("per_page", per_page.to_string())];
    let mut pages = pin!(client.pages::<Vec<Release>>(&path, &params));

    while let Some(releases) = pages.try_next().await? {
        if let Some(release) = releases.into_iter().find(|r| r.tag_name == tag) {
            info!("found {release} in {repo} (draft: {})", release.draft);
            return Ok(Some(release));
        }
    }

    info!("release {tag} not found in {repo}");
    Ok(None)
}

/// Creates a published pre-release tagged `tag`.
///
/// # Errors
///
/// Returns a [`TransportError`] if the release cannot be created. A tag claimed by another release
/// in the meantime fails with `422 Unprocessable Entity`, see [`TransportError::is_conflict`].
pub async fn create_release(
    client: &GitHubClient,
    repo: &RepoRef,
    tag: &str,
) -> Result<Release, TransportError> {
    info!("creating release {tag} in {repo}…");
    let body = Body::Json(json!({
        "tag_name": tag,
        "name": tag,
        "body": "Latest successful CI builds of the apps in the catalog.",
        "draft": false,
        "prerelease": true,
    }));

    let response = client
        .request(
            Method::POST,
            &format!("repos/{repo}/releases"),
            &[],
            Some(&body),
        )
        .await?;
    let release = response.json::<Release>()?;

    info!("created {release} in {repo}");
    Ok(release)
}

/// Finds the asset named exactly `name` in a release, scanning the asset listing lazily.
///
/// The listing is always requested fresh so that assets uploaded by concurrent resolutions are seen.
///
/// # Errors
///
/// Returns a [`TransportError`] if listing the assets fails.
pub async fn find_asset(
    client: &GitHubClient,
    repo: &RepoRef,
    release: &Release,
    name: &str,
    per_page: u8,
) -> Result<Option<ReleaseAsset>, TransportError> {
    let path = format!("repos/{repo}/releases/{}/assets", release.id);
    debug!("looking for asset {name} at {path}…");

    let params = [("per_page", per_page.to_string())];
    let mut pages = pin!(client.pages::<Vec<ReleaseAsset>>(&path, &params));

    while let Some(assets) = pages.try_next().await? {
        if let Some(asset) = assets.into_iter().find(|a| a.name == name) {
            debug!("found asset {asset} in {release}");
            return Ok(Some(asset));
        }
    }

    debug!("asset {name} not found in {release}");
    Ok(None)
}

/// Uploads `bytes` as a new asset named `name` to a release.
///
/// # Errors
///
/// Returns a [`TransportError`] if the upload fails. An asset with the same name fails with
/// `422 Unprocessable Entity`, see [`TransportError::is_conflict`].
pub async fn upload_asset(
    client: &GitHubClient,
    release: &Release,
    name: &str,
    content_type: &str,
    bytes: Bytes,
) -> Result<ReleaseAsset, TransportError> {
    let endpoint = release.upload_endpoint();
    let size = bytes.len();
    info!("uploading {name} ({size} bytes) to {release}…");

    let body = Body::Bytes {
        content_type: content_type.to_owned(),
        bytes,
    };
    let response = client
        .request(
            Method::POST,
            endpoint,
            &[("name", name.to_owned())],
            Some(&body),
        )
        .await?;
    let asset = response.json::<ReleaseAsset>()?;

    info!("uploaded {asset} to {release}");
    Ok(asset)
}

/// Deletes a release asset. An asset that is already gone is not an error.
///
/// # Errors
///
/// Returns a [`TransportError`] if the deletion fails.
pub async fn delete_asset(
    client: &GitHubClient,
    repo: &RepoRef,
    asset: &ReleaseAsset,
) -> Result<(), TransportError> {
    warn!("deleting asset {asset} from {repo}…");
    let response = client
        .request(
            Method::DELETE,
            &format!("repos/{repo}/releases/assets/{}", asset.id),
            &[],
            None,
        )
        .await?;

    if response.is_not_found() {
        debug!("asset {asset} was already gone");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_the_upload_template() {
        let release: Release = serde_json::from_value(serde_json::json!({
            "id": 1,
            "tag_name": "app-artifacts",
            "name": "app-artifacts",
            "upload_url": "https://uploads.github.com/repos/org/catalog/releases/1/assets{?name,label}",
        }))
        .unwrap();

        assert_eq!(
            release.upload_endpoint(),
            "https://uploads.github.com/repos/org/catalog/releases/1/assets"
        );
        assert!(!release.draft);
    }

    #[test]
    fn only_finalized_assets_are_complete() {
        let asset = |state: &str, size| ReleaseAsset {
            id: 7,
            name: String::from("App.ipa"),
            size,
            state: state.to_owned(),
            content_type: None,
            browser_download_url: String::from(
                "https://github.com/org/catalog/releases/download/app-artifacts/App.ipa",
            ),
        };

        assert!(asset("uploaded", 5_242_880).is_complete());
        assert!(!asset("starter", 5_242_880).is_complete());
        assert!(!asset("uploaded", 0).is_complete());
    }
}
