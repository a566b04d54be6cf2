//! Catalog entries driving the artifact resolution.
//!
//! A catalog is an `apps.json` file holding a list of app records. Only records naming both a
//! `workflow_file` and an `artifact_name` are built by CI; every other record is skipped.

#![cfg(feature = "transactions")]

use std::{fmt, path::Path, str::FromStr};

use anyhow::{Context as _, bail};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::repository::{InvalidRepoRef, RepoRef};

/// One app whose latest CI artifact is resolved and cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogEntry {
    /// The display name of the app.
    pub name: String,
    /// The repository running the workflow.
    pub repo: RepoRef,
    /// The file name of the workflow, e.g. `build.yml`.
    pub workflow_file: String,
    /// The exact name of the artifact produced by the workflow.
    pub artifact_name: String,
    /// The name of the asset in the cache release, if it differs from the artifact name.
    pub cache_asset_name: Option<String>,
}

impl CatalogEntry {
    /// Creates an entry named after its repository.
    pub fn new(repo: RepoRef, workflow_file: &str, artifact_name: &str) -> Self {
        Self {
            name: repo.to_string(),
            repo,
            workflow_file: workflow_file.to_owned(),
            artifact_name: artifact_name.to_owned(),
            cache_asset_name: None,
        }
    }

    /// Returns the name of the asset in the cache release.
    pub fn asset_name(&self) -> &str {
        self.cache_asset_name
            .as_deref()
            .unwrap_or(&self.artifact_name)
    }
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}, {})",
            self.name, self.repo, self.workflow_file, self.artifact_name
        )
    }
}

/// A malformed `owner/repo,workflow_file,artifact_name[,name]` entry.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidEntry {
    /// Fewer than three or more than four fields.
    #[error("expected owner/repo,workflow_file,artifact_name[,name], got '{0}'")]
    Shape(String),
    /// The repository is not an `owner/name` reference.
    #[error(transparent)]
    Repo(#[from] InvalidRepoRef),
}

impl FromStr for CatalogEntry {
    type Err = InvalidEntry;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        match fields.as_slice() {
            [repo, workflow_file, artifact_name, rest @ ..]
                if rest.len() <= 1
                    && !workflow_file.is_empty()
                    && !artifact_name.is_empty() =>
            {
                let mut entry = Self::new(repo.parse()?, workflow_file, artifact_name);
                if let Some(name) = rest.first().filter(|name| !name.is_empty()) {
                    entry.name = (*name).to_owned();
                }
                Ok(entry)
            }
            _ => Err(InvalidEntry::Shape(s.to_owned())),
        }
    }
}

/// An app record as stored in `apps.json`. Keys other than these are ignored.
#[derive(Debug, Deserialize)]
struct Record {
    name: Option<String>,
    #[serde(alias = "repo")]
    github_repo: Option<String>,
    workflow_file: Option<String>,
    artifact_name: Option<String>,
    cache_asset_name: Option<String>,
}

/// Parses the records of a catalog, keeping the ones built by CI.
///
/// Invalid records are logged and skipped so that one broken record does not hide the others.
///
/// # Errors
///
/// Returns an error if the document is not a JSON list of objects.
pub fn parse_catalog(json: &str, source: &str) -> anyhow::Result<Vec<CatalogEntry>> {
    let records: Vec<Record> = match serde_json::from_str(json) {
        Ok(records) => records,
        Err(err) => bail!("{source} must hold a list of app records: {err}"),
    };

    let mut entries = Vec::new();
    for (idx, record) in records.into_iter().enumerate() {
        let (Some(workflow_file), Some(artifact_name)) = (record.workflow_file, record.artifact_name)
        else {
            debug!("{source} item {idx}: not built by CI, skipping");
            continue;
        };

        let repo = match record.github_repo.as_deref().map(str::parse::<RepoRef>) {
            Some(Ok(repo)) => repo,
            Some(Err(err)) => {
                warn!("{source} item {idx}: {err}, skipping");
                continue;
            }
            None => {
                warn!("{source} item {idx}: missing github_repo, skipping");
                continue;
            }
        };

        entries.push(CatalogEntry {
            name: record.name.unwrap_or_else(|| repo.to_string()),
            repo,
            workflow_file,
            artifact_name,
            cache_asset_name: record.cache_asset_name,
        });
    }

    info!("{source}: {} CI-built app(s)", entries.len());
    Ok(entries)
}

/// Reads and parses a catalog file.
///
/// See: [`parse_catalog`]
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a list of app records.
pub async fn load_catalog<P>(path: P) -> anyhow::Result<Vec<CatalogEntry>>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read catalog {}", path.display()))?;

    parse_catalog(&json, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_ci_built_records() {
        let json = r##"[
            {
                "name": "Play! (Nightly)",
                "github_repo": "jpd002/Play-",
                "icon_url": "https://example.com/play.png",
                "workflow_file": "build-ios.yaml",
                "artifact_name": "Play_iOS"
            },
            { "name": "Static", "github_repo": "org/static", "tint_color": "#fff" },
            { "name": "Broken", "github_repo": "not a repo", "workflow_file": "b.yml", "artifact_name": "x" },
            { "repo": "org/app", "workflow_file": "build.yml", "artifact_name": "App.ipa", "cache_asset_name": "org-app.ipa" }
        ]"##;

        let entries = parse_catalog(json, "apps.json").unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].name, "Play! (Nightly)");
        assert_eq!(entries[0].repo.as_str(), "jpd002/Play-");
        assert_eq!(entries[0].asset_name(), "Play_iOS");

        assert_eq!(entries[1].name, "org/app");
        assert_eq!(entries[1].asset_name(), "org-app.ipa");
    }

    #[test]
    fn rejects_non_list_catalogs() {
        assert!(parse_catalog(r#"{"apps": []}"#, "apps.json").is_err());
    }

    #[test]
    fn parses_operator_entries() {
        let entry: CatalogEntry = "AngelAuraMC/Amethyst-iOS, development.yml, org.angelauramc.amethyst-ios.ipa, Amethyst (Nightly)"
            .parse()
            .unwrap();

        assert_eq!(entry.name, "Amethyst (Nightly)");
        assert_eq!(entry.workflow_file, "development.yml");
        assert_eq!(entry.artifact_name, "org.angelauramc.amethyst-ios.ipa");
        assert_eq!(
            entry.to_string(),
            "Amethyst (Nightly) (AngelAuraMC/Amethyst-iOS, development.yml, org.angelauramc.amethyst-ios.ipa)"
        );

        assert!(matches!(
            "org/app,build.yml".parse::<CatalogEntry>(),
            Err(InvalidEntry::Shape(_))
        ));
        assert!(matches!(
            "org,build.yml,App.ipa".parse::<CatalogEntry>(),
            Err(InvalidEntry::Repo(_))
        ));
    }
}
