//! Artifact mirror client.
//!
//! Locates the latest published build of the application so `update` can
//! replace the running binary. Builds are published per system under
//! `<artifact_path>/latest/` with names carrying `<os>_<arch>` markers.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Where published builds live. All three fields must be set for
/// self-update to be available.
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    /// Listing API base, e.g. `https://mirror.example.com/api/generic`.
    pub api_url: String,
    /// Download base, e.g. `https://mirror.example.com/repository/generic`.
    pub download_url: String,
    /// The application's artifact path within the mirror.
    pub artifact_path: String,
}

impl MirrorOptions {
    pub fn is_configured(&self) -> bool {
        !self.api_url.is_empty() && !self.download_url.is_empty() && !self.artifact_path.is_empty()
    }
}

/// One published build.
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub name: String,
    pub sha256: String,
    pub created_date: String,
    pub url: String,
    pub size: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListResponse {
    #[serde(default)]
    data: ListData,
}

#[derive(Debug, Default, Deserialize)]
struct ListData {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    #[serde(default)]
    name: String,
    #[serde(default)]
    created_date: String,
    #[serde(default)]
    sha256: String,
    #[serde(default)]
    size: String,
}

/// Queries the mirror for the newest build matching the current system.
pub fn latest(options: &MirrorOptions) -> Result<ArtifactInfo> {
    let api = list_api(options);
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("failed to build the mirror client")?;
    let response: ListResponse = client
        .get(&api)
        .send()
        .with_context(|| format!("mirror request {api} failed"))?
        .error_for_status()
        .context("mirror request was rejected")?
        .json()
        .context("unexpected mirror response")?;
    let record = find_record(&response.data.records)
        .ok_or_else(|| anyhow!("no artifact matches the current system"))?;
    Ok(record_to_info(options, record))
}

fn list_api(options: &MirrorOptions) -> String {
    format!(
        "{}/list?full_path={}/latest",
        options.api_url.trim_end_matches('/'),
        options.artifact_path
    )
}

fn record_to_info(options: &MirrorOptions, record: &Record) -> ArtifactInfo {
    ArtifactInfo {
        name: record.name.clone(),
        sha256: record.sha256.clone(),
        created_date: record.created_date.clone(),
        url: format!(
            "{}/{}/latest/{}",
            options.download_url.trim_end_matches('/'),
            options.artifact_path,
            record.name
        ),
        size: record.size.clone(),
    }
}

// Record order on the mirror is not stable, so the controlled keyword
// list decides: the exact `<os>_<arch>` build first, the os-wide one next.
fn find_record<'r>(records: &'r [Record]) -> Option<&'r Record> {
    for keyword in os_keywords() {
        for record in records {
            if record.name.contains(&keyword) {
                return Some(record);
            }
        }
    }
    None
}

fn os_keywords() -> Vec<String> {
    let os = artifact_os();
    vec![format!("{os}_{}", engine::host_arch()), os.to_string()]
}

// Published binaries name the mac builds `macos`.
fn artifact_os() -> &'static str {
    match engine::host_os() {
        "darwin" => "macos",
        other => other,
    }
}
