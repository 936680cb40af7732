//! Jenkins JSON API payloads
//!
//! Only the fields the client reads are modelled; everything else is ignored.

use serde::{Deserialize, Serialize};

/// `GET <job>/api/json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub next_build_number: u64,
    pub url: String,
}

/// `GET <job>/<n>/api/json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub number: u64,
    #[serde(default)]
    pub building: bool,
    pub result: Option<String>,
    pub url: String,
    #[serde(default)]
    pub artifacts: Vec<BuildArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifact {
    pub file_name: String,
    pub relative_path: String,
}

/// `GET <server>/queue/item/<id>/api/json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: u64,
    #[serde(default)]
    pub cancelled: bool,
    pub executable: Option<QueueExecutable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueExecutable {
    pub number: u64,
    pub url: String,
}

/// `GET <server>/me/api/json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmI {
    pub full_name: String,
}
