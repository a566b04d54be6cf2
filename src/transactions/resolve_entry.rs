use std::fmt;

use tokio_util::{bytes::Bytes, sync::CancellationToken};
use tracing::{debug, info, warn};

use crate::{
    catalog::CatalogEntry,
    error::{NotFound, ResolveError, Step, TransportError},
    release::{
        Release, ReleaseAsset, create_release, delete_asset, find_asset, find_release, upload_asset,
    },
    transactions::{AssetKey, Context, download_artifact},
    workflow::{
        WorkflowRun,
        artifact::{Artifact, artifacts_for_run, select_artifact},
        latest_successful_run,
    },
};

/// The states of the cache release for one asset name.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing is known about the cache release yet.
    Unresolved,
    /// The cache release does not exist.
    ReleaseMissing,
    /// The cache release exists, or has just been created.
    ReleaseFound,
    /// A finalized asset with the requested name exists.
    AssetHit,
    /// No finalized asset with the requested name exists.
    AssetMiss,
    /// The artifact has been uploaded under the requested name.
    Uploaded,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unresolved => "UNRESOLVED",
            Self::ReleaseMissing => "RELEASE_MISSING",
            Self::ReleaseFound => "RELEASE_FOUND",
            Self::AssetHit => "ASSET_HIT",
            Self::AssetMiss => "ASSET_MISS",
            Self::Uploaded => "UPLOADED",
        })
    }
}

/// An artifact available from the cache release.
#[derive(Debug, Clone)]
pub struct CachedAsset {
    /// The asset in the cache release.
    pub asset: ReleaseAsset,
    /// The states passed through, starting at [`CacheState::Unresolved`].
    pub transitions: Vec<CacheState>,
}

impl CachedAsset {
    /// Returns the final state, [`CacheState::AssetHit`] or [`CacheState::Uploaded`].
    pub fn state(&self) -> CacheState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(CacheState::Unresolved)
    }

    /// Returns `true` if the asset existed before, so no artifact bytes were transferred.
    pub fn is_hit(&self) -> bool {
        self.state() == CacheState::AssetHit
    }

    /// Returns the stable download url of the asset.
    pub fn download_url(&self) -> &str {
        &self.asset.browser_download_url
    }
}

/// A resolved catalog entry.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The run the artifact was taken from.
    pub run: WorkflowRun,
    /// The selected artifact.
    pub artifact: Artifact,
    /// The cached copy of the artifact.
    pub cached: CachedAsset,
}

impl Resolved {
    /// Returns the stable download url of the cached artifact.
    pub fn download_url(&self) -> &str {
        self.cached.download_url()
    }
}

fn check(cancel: &CancellationToken, step: Step) -> Result<(), ResolveError> {
    if cancel.is_cancelled() {
        Err(ResolveError::Cancelled { step })
    } else {
        Ok(())
    }
}

/// Resolves one catalog entry: finds its latest successful run, selects the artifact and caches it.
///
/// Every step waits for the previous one. Cancellation is observed between steps; an upload that has
/// started is finished or cleaned up.
///
/// # Errors
///
/// Returns a [`ResolveError`] naming the step the resolution stopped at.
pub async fn resolve_entry(
    cx: &Context,
    entry: &CatalogEntry,
    cancel: &CancellationToken,
) -> Result<Resolved, ResolveError> {
    info!("resolving {entry}…");

    check(cancel, Step::RunLookup)?;
    let run = latest_successful_run(
        &cx.client,
        &entry.repo,
        &entry.workflow_file,
        cx.per_page,
        cx.run_scan_pages,
    )
    .await
    .map_err(ResolveError::transport(Step::RunLookup))?
    .ok_or(NotFound::NoSuccessfulRun)?;

    check(cancel, Step::ArtifactListing)?;
    let artifacts = artifacts_for_run(&cx.client, &entry.repo, run.id, cx.per_page)
        .await
        .map_err(ResolveError::transport(Step::ArtifactListing))?;
    let artifact = select_artifact(artifacts, &entry.artifact_name, run.id)?;
    info!("found artifact {artifact} in {run}");

    let cached = cache_artifact(cx, &artifact, entry.asset_name(), cancel).await?;
    Ok(Resolved {
        run,
        artifact,
        cached,
    })
}

/// Returns the asset named `name` from the cache release, uploading `artifact` under that name first
/// if there is none.
///
/// The lookup and the upload form a critical section per asset name: concurrent calls for the same
/// name wait for each other, and the later ones find the asset uploaded by the first. An upload
/// racing another process is settled by checking the release again.
///
/// # Errors
///
/// Returns a [`ResolveError`] if the release is missing and may not be created, if writing is
/// required without a credential, or if a step fails.
pub async fn cache_artifact(
    cx: &Context,
    artifact: &Artifact,
    name: &str,
    cancel: &CancellationToken,
) -> Result<CachedAsset, ResolveError> {
    let key = AssetKey {
        repo: cx.cache_repo.clone(),
        tag: cx.tag.clone(),
        name: name.to_owned(),
    };
    let _guard = cx.locks.lock(key).await;
    let mut transitions = vec![CacheState::Unresolved];

    check(cancel, Step::ReleaseLookup)?;
    let release = match find_release(&cx.client, &cx.cache_repo, &cx.tag, cx.per_page)
        .await
        .map_err(ResolveError::transport(Step::ReleaseLookup))?
    {
        Some(release) => release,
        None => {
            transitions.push(CacheState::ReleaseMissing);
            ensure_release(cx, cancel).await?
        }
    };
    transitions.push(CacheState::ReleaseFound);

    check(cancel, Step::AssetListing)?;
    let existing = find_asset(&cx.client, &cx.cache_repo, &release, name, cx.per_page)
        .await
        .map_err(ResolveError::transport(Step::AssetListing))?;

    let partial = match existing {
        Some(asset) if asset.is_complete() => {
            transitions.push(CacheState::AssetHit);
            info!("cache hit for {name}: {}", asset.browser_download_url);
            return Ok(CachedAsset { asset, transitions });
        }
        partial => partial,
    };
    transitions.push(CacheState::AssetMiss);
    info!("cache miss for {name} in {release}");

    if !cx.can_write() {
        return Err(ResolveError::Authorization {
            step: Step::Upload,
            reason: String::from("no GitHub token is configured"),
        });
    }

    check(cancel, Step::Download)?;
    let archive = download_artifact(&cx.client, artifact)
        .await
        .map_err(ResolveError::transport(Step::Download))?;

    if let Some(partial) = partial {
        warn!("found unfinished asset {partial}, replacing it");
        delete_asset(&cx.client, &cx.cache_repo, &partial)
            .await
            .map_err(ResolveError::transport(Step::Upload))?;
    }

    let (asset, state) = upload(cx, &release, name, archive).await?;
    transitions.push(state);
    Ok(CachedAsset { asset, transitions })
}

/// Creates the missing cache release if allowed, settling a creation race by looking it up again.
async fn ensure_release(cx: &Context, cancel: &CancellationToken) -> Result<Release, ResolveError> {
    if !cx.create_release {
        return Err(NotFound::NoRelease {
            repo: cx.cache_repo.to_string(),
            tag: cx.tag.clone(),
        }
        .into());
    }
    if !cx.can_write() {
        return Err(ResolveError::Authorization {
            step: Step::ReleaseCreation,
            reason: String::from("no GitHub token is configured"),
        });
    }

    check(cancel, Step::ReleaseCreation)?;
    match create_release(&cx.client, &cx.cache_repo, &cx.tag).await {
        Ok(release) => Ok(release),
        Err(err) if err.is_conflict() => {
            warn!("release {} was created concurrently: {err}", cx.tag);
            find_release(&cx.client, &cx.cache_repo, &cx.tag, cx.per_page)
                .await
                .map_err(ResolveError::transport(Step::ReleaseLookup))?
                .ok_or_else(|| ResolveError::transport(Step::ReleaseCreation)(err))
        }
        Err(err) => Err(ResolveError::transport(Step::ReleaseCreation)(err)),
    }
}

/// Uploads the archive and verifies the result.
///
/// A name collision means another upload got there first: its finalized asset is a hit and the local
/// archive is discarded, while an unfinished one is deleted and the upload is repeated once. An
/// upload that fails or comes back incomplete leaves nothing behind.
async fn upload(
    cx: &Context,
    release: &Release,
    name: &str,
    archive: Bytes,
) -> Result<(ReleaseAsset, CacheState), ResolveError> {
    let expected_size = u64::try_from(archive.len()).unwrap_or(u64::MAX);
    let mut replaced_partial = false;

    loop {
        let err = match upload_asset(&cx.client, release, name, "application/zip", archive.clone())
            .await
        {
            Ok(asset) if asset.is_complete() && asset.size == expected_size => {
                return Ok((asset, CacheState::Uploaded));
            }
            Ok(asset) => {
                warn!("upload of {name} came back incomplete: {asset}");
                discard(cx, &asset).await;
                return Err(ResolveError::Transport {
                    step: Step::Upload,
                    source: TransportError::Integrity {
                        url: release.upload_endpoint().to_owned(),
                        reason: format!("expected {expected_size} uploaded bytes, got {asset}"),
                    },
                });
            }
            Err(err) => err,
        };

        let current = find_asset(&cx.client, &cx.cache_repo, release, name, cx.per_page)
            .await
            .map_err(ResolveError::transport(Step::AssetListing))?;

        match current {
            Some(asset) if asset.is_complete() && err.is_conflict() => {
                info!("{name} was uploaded concurrently, discarding the local copy");
                return Ok((asset, CacheState::AssetHit));
            }
            Some(asset) if asset.is_complete() => {
                // The failed attempt has been finalized after all.
                debug!("upload of {name} failed with {err}, but {asset} is present");
                return Ok((asset, CacheState::Uploaded));
            }
            Some(partial) => {
                discard(cx, &partial).await;
                if err.is_conflict() && !replaced_partial {
                    replaced_partial = true;
                    warn!("replaced unfinished asset {partial}, uploading {name} again…");
                    continue;
                }
            }
            None => {}
        }

        return Err(if err.is_conflict() {
            ResolveError::Conflict {
                name: name.to_owned(),
            }
        } else {
            ResolveError::transport(Step::Upload)(err)
        });
    }
}

async fn discard(cx: &Context, asset: &ReleaseAsset) {
    if let Err(err) = delete_asset(&cx.client, &cx.cache_repo, asset).await {
        warn!("failed to delete unfinished asset {asset}: {err}");
    }
}
