//! Fixtures shared by the integration tests. Every test talks to a `wiremock` server.

#![allow(dead_code)]

use artifact_cache::{
    catalog::CatalogEntry, config::Config, framework::RetryPolicy, transactions::Context,
};
use serde_json::{Value, json};
use wiremock::MockServer;

pub const TOKEN: &str = "test-token";
pub const CACHE_REPO: &str = "org/catalog";
pub const TAG: &str = "app-artifacts";
pub const RELEASE_ID: u64 = 1;

pub const RUNS_PATH: &str = "/repos/org/app/actions/workflows/build.yml/runs";
pub const ARTIFACTS_PATH: &str = "/repos/org/app/actions/runs/42/artifacts";
pub const RELEASE_BY_TAG_PATH: &str = "/repos/org/catalog/releases/tags/app-artifacts";
pub const RELEASES_PATH: &str = "/repos/org/catalog/releases";
pub const ASSETS_PATH: &str = "/repos/org/catalog/releases/1/assets";
pub const DOWNLOAD_PATH: &str = "/repos/org/app/actions/artifacts/7/zip";
pub const UPLOAD_PATH: &str = "/uploads/repos/org/catalog/releases/1/assets";

pub const ARCHIVE: &[u8] = b"PK\x03\x04 pretend this is App.ipa";

pub fn config(server: &MockServer, token: Option<&str>) -> Config {
    Config {
        api_url: server.uri(),
        token: token.map(str::to_owned),
        cache_repo: Some(String::from(CACHE_REPO)),
        tag: String::from(TAG),
        retry: RetryPolicy::immediate(2),
        ..Config::default()
    }
}

pub fn context(server: &MockServer, token: Option<&str>) -> Context {
    let config = config(server, token);
    let client = config.client().unwrap();
    Context::with_client(&config, client, CACHE_REPO.parse().unwrap())
}

pub fn entry() -> CatalogEntry {
    let mut entry = CatalogEntry::new("org/app".parse().unwrap(), "build.yml", "App.ipa");
    entry.name = String::from("App");
    entry
}

pub fn run(id: u64, conclusion: Option<&str>, created_at: &str) -> Value {
    json!({
        "id": id,
        "name": "build",
        "head_branch": "main",
        "head_sha": format!("abcdef1{id:033}"),
        "status": if conclusion.is_some() { "completed" } else { "in_progress" },
        "conclusion": conclusion,
        "created_at": created_at,
        "html_url": format!("https://github.com/org/app/actions/runs/{id}"),
    })
}

pub fn runs(runs: Vec<Value>) -> Value {
    json!({ "total_count": runs.len(), "workflow_runs": runs })
}

pub fn artifact(server: &MockServer, id: u64, name: &str, expired: bool) -> Value {
    json!({
        "id": id,
        "node_id": "MDg6QXJ0aWZhY3Qx",
        "name": name,
        "size_in_bytes": 5_242_880,
        "url": format!("{}/repos/org/app/actions/artifacts/{id}", server.uri()),
        "archive_download_url": format!("{}/repos/org/app/actions/artifacts/{id}/zip", server.uri()),
        "expired": expired,
        "created_at": "2026-10-18T10:00:00Z",
        "expires_at": "2027-01-16T10:00:00Z",
        "digest": null,
    })
}

pub fn artifacts(artifacts: Vec<Value>) -> Value {
    json!({ "total_count": artifacts.len(), "artifacts": artifacts })
}

pub fn release(server: &MockServer) -> Value {
    json!({
        "id": RELEASE_ID,
        "tag_name": TAG,
        "name": TAG,
        "draft": false,
        "prerelease": true,
        "upload_url": format!("{}{UPLOAD_PATH}{{?name,label}}", server.uri()),
        "html_url": "https://github.com/org/catalog/releases/tag/app-artifacts",
    })
}

pub fn asset(id: u64, name: &str, state: &str, size: usize) -> Value {
    json!({
        "id": id,
        "name": name,
        "size": size,
        "state": state,
        "content_type": "application/zip",
        "browser_download_url": format!("https://github.com/org/catalog/releases/download/app-artifacts/{name}"),
    })
}
