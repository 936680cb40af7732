//! Job and run domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of a job template on the remote server
///
/// Folder-scoped jobs use `/` separators, e.g. `pool-of-clusters/destroy-cluster`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobName(String);

impl JobName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Folder segments of the job name, skipping empty ones
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Parameters passed verbatim to a triggered run
///
/// Ordered so that trigger requests and logs are deterministic.
pub type JobParameters = BTreeMap<String, String>;

/// Handle to one execution of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub job: JobName,
    /// Sequence number of the run within the job's history
    pub number: u64,
    /// Queue item issued by the server when the run was triggered, if any
    pub queue_item: Option<u64>,
}

impl RunHandle {
    pub fn new(job: JobName, number: u64) -> Self {
        Self {
            job,
            number,
            queue_item: None,
        }
    }

    pub fn with_queue_item(mut self, queue_item: u64) -> Self {
        self.queue_item = Some(queue_item);
        self
    }

    /// Returns the same run tracked under a different sequence number
    pub fn rebind(&self, number: u64) -> Self {
        Self {
            job: self.job.clone(),
            number,
            queue_item: self.queue_item,
        }
    }
}

impl fmt::Display for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.job, self.number)
    }
}

/// What the server's queue reports about a triggered run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Still waiting for an executor; no run exists yet
    Waiting,
    /// Started under this sequence number
    Started(u64),
    /// Cancelled before it started; no run will ever exist
    Cancelled,
    /// No queue item to ask about, or the server no longer remembers it
    Untracked,
}

/// Observed state of a run
///
/// Driven entirely by the remote server; transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failure)
    }

    /// Maps the server's `result` field of a visible run
    ///
    /// A missing result means the run is still executing. Every terminal result
    /// other than `SUCCESS` (aborted, unstable, not built) counts as a failure.
    pub fn from_result(result: Option<&str>) -> Self {
        match result {
            None => RunStatus::Running,
            Some("SUCCESS") => RunStatus::Success,
            Some(_) => RunStatus::Failure,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
        };
        f.write_str(s)
    }
}

/// File attached to a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub file_name: String,
    pub relative_path: String,
    pub run: RunHandle,
}

/// Point-in-time view of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub artifacts: Vec<ArtifactRef>,
    /// Browsable URL of the run, always ending in `/`
    pub run_url: String,
}

impl RunSnapshot {
    pub fn pending(run_url: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Pending,
            artifacts: Vec::new(),
            run_url: run_url.into(),
        }
    }

    /// Download URL of an artifact produced by this run
    pub fn artifact_url(&self, artifact: &ArtifactRef) -> String {
        format!("{}artifact/{}", self.run_url, artifact.relative_path)
    }

    /// Artifacts whose file name ends with `suffix`
    pub fn artifacts_with_suffix<'a>(&'a self, suffix: &'a str) -> Vec<&'a ArtifactRef> {
        self.artifacts
            .iter()
            .filter(|a| a.file_name.ends_with(suffix))
            .collect()
    }
}

/// How waiting on a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
    /// The wait limit expired before the run reached a terminal state
    TimedOut,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Success => "SUCCESS",
            RunOutcome::Failure => "FAILURE",
            RunOutcome::TimedOut => "TIMEOUT",
        };
        f.write_str(s)
    }
}

/// Result of waiting on a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub handle: RunHandle,
    pub outcome: RunOutcome,
    /// Last snapshot read from the server
    pub snapshot: RunSnapshot,
    /// Number of status queries issued
    pub polls: u32,
}
