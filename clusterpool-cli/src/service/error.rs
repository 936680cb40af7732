//! Service layer errors

use clusterpool_client::ClientError;
use clusterpool_core::domain::cluster::PoolInfoError;
use clusterpool_core::domain::job::{JobName, RunReport};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures while retrieving or staging an artifact
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact URL has no file name: {0}")]
    InvalidUrl(String),

    #[error("failed to download {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to download {url}: HTTP status {status}")]
    Download { url: String, status: u16 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error(
        "archive {archive} must contain exactly one top-level directory named {expected:?}, found {found:?}"
    )]
    ArchiveLayout {
        archive: PathBuf,
        expected: String,
        found: Vec<String>,
    },
}

impl ArtifactError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why the pool path could not produce a cluster; always recovered by creating one
#[derive(Debug, Error)]
pub enum PoolQueryError {
    #[error("expected exactly one pool info artifact, found {0}")]
    InfoArtifactCount(usize),

    #[error(transparent)]
    Fetch(#[from] ArtifactError),

    #[error("failed to read pool info {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] PoolInfoError),
}

/// Fatal outcomes of the lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("job server request failed: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("{job} run #{number} failed, see {run_url}")]
    RunFailed {
        job: JobName,
        number: u64,
        run_url: String,
    },

    #[error("{job} run #{number} did not finish within {waited:?}, see {run_url}")]
    RunTimedOut {
        job: JobName,
        number: u64,
        run_url: String,
        waited: Duration,
    },

    #[error(
        "{job} run #{number} produced {found} cluster access archives, expected exactly one"
    )]
    MissingClusterArchive {
        job: JobName,
        number: u64,
        found: usize,
    },
}

impl LifecycleError {
    pub(crate) fn run_failed(report: &RunReport) -> Self {
        Self::RunFailed {
            job: report.handle.job.clone(),
            number: report.handle.number,
            run_url: report.snapshot.run_url.clone(),
        }
    }

    pub(crate) fn run_timed_out(report: &RunReport, waited: Duration) -> Self {
        Self::RunTimedOut {
            job: report.handle.job.clone(),
            number: report.handle.number,
            run_url: report.snapshot.run_url.clone(),
            waited,
        }
    }
}
