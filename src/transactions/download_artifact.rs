use futures::TryStreamExt as _;
use reqwest::Method;
use sha2::Digest as _;
use tokio_util::bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::{
    client::GitHubClient,
    error::TransportError,
    framework::retry,
    workflow::artifact::Artifact,
};

/// Downloads the archive of an [`Artifact`] into memory, retrying broken transfers.
///
/// The archive is checked against the artifact digest when GitHub provides one. An empty archive is
/// never returned.
///
/// # Errors
///
/// Returns the [`TransportError`] of the last attempt if the download keeps failing. An expired or
/// removed artifact fails with `410 Gone` and is not retried.
pub async fn download_artifact(
    client: &GitHubClient,
    artifact: &Artifact,
) -> Result<Bytes, TransportError> {
    retry(client.policy(), &format!("download {artifact}"), || {
        download_once(client, artifact)
    })
    .await
}

async fn download_once(client: &GitHubClient, artifact: &Artifact) -> Result<Bytes, TransportError> {
    let url = &artifact.archive_download_url;
    debug!("requesting download from {url}…");
    let response = client.stream(url).await?;
    info!("downloading artifact {artifact}…");

    let mut sha_hasher = sha2::Sha256::new();
    let capacity = usize::try_from(artifact.size_in_bytes).unwrap_or_default();
    let archive = response
        .bytes_stream()
        .map_ok(|bytes| {
            sha_hasher.update(&bytes);
            bytes
        })
        .try_fold(BytesMut::with_capacity(capacity), |mut archive, bytes| async move {
            archive.extend_from_slice(&bytes);
            Ok(archive)
        })
        .await
        .map_err(|source| TransportError::Network {
            method: Method::GET,
            url: url.clone(),
            source,
        })?
        .freeze();

    if archive.is_empty() {
        return Err(TransportError::Integrity {
            url: url.clone(),
            reason: String::from("empty archive"),
        });
    }

    match artifact.digest.as_deref() {
        Some(digest) => {
            let expected = digest.strip_prefix("sha256:").unwrap_or(digest);
            let actual = hex::encode(sha_hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(TransportError::Integrity {
                    url: url.clone(),
                    reason: format!("digest mismatch, expected {expected}, got {actual}"),
                });
            }
        }
        None => warn!("digest not provided for {artifact}"),
    }

    info!("downloaded artifact {artifact} ({} bytes)", archive.len());
    Ok(archive)
}
