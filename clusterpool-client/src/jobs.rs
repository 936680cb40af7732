//! Job and run endpoints

use crate::JenkinsClient;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use clusterpool_core::domain::job::{
    ArtifactRef, JobName, JobParameters, QueueState, RunHandle, RunSnapshot, RunStatus,
};
use clusterpool_core::dto::jenkins::{BuildInfo, JobInfo, QueueItem};
use reqwest::header::LOCATION;
use tracing::debug;

/// Capability over the remote job server
///
/// No call retries internally; any transport or auth error is returned to the
/// caller as is.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Submits a run of `job` and returns a handle to it
    ///
    /// The run number is read from the job's next sequence number before
    /// submission, so a concurrent trigger of the same job can make the handle
    /// point at someone else's run. [`JobClient::resolve`] narrows that window.
    async fn trigger(&self, job: &JobName, params: &JobParameters) -> Result<RunHandle>;

    /// Fetches the current state of a run without blocking
    async fn status(&self, handle: &RunHandle) -> Result<RunSnapshot>;

    /// Fetches the full console log of a run
    async fn console(&self, handle: &RunHandle) -> Result<String>;

    /// Browsable URL of a run, ending in `/`, whether or not it exists yet
    fn run_url(&self, handle: &RunHandle) -> String;

    /// Asks the server-issued queue item what became of the run
    ///
    /// Callers keep asking while this returns [`QueueState::Waiting`].
    async fn resolve(&self, _handle: &RunHandle) -> Result<QueueState> {
        Ok(QueueState::Untracked)
    }
}

impl JenkinsClient {
    // =============================================================================
    // Raw Endpoints
    // =============================================================================

    /// Get job metadata (next build number, job URL)
    pub async fn get_job_info(&self, job: &JobName) -> Result<JobInfo> {
        let url = format!("{}/api/json", self.job_url(job));
        let response = self.get(&url).send().await?;

        match self.handle_optional_response(response).await? {
            Some(info) => Ok(info),
            None => Err(ClientError::NotFound(format!("job {}", job))),
        }
    }

    /// Get a build, or `None` if the server does not know it yet
    pub async fn get_build_info(&self, job: &JobName, number: u64) -> Result<Option<BuildInfo>> {
        let url = format!("{}/{}/api/json", self.job_url(job), number);
        let response = self.get(&url).send().await?;

        self.handle_optional_response(response).await
    }

    /// Get a queue item, or `None` once the server has forgotten it
    pub async fn get_queue_item(&self, id: u64) -> Result<Option<QueueItem>> {
        let url = format!("{}/queue/item/{}/api/json", self.base_url, id);
        let response = self.get(&url).send().await?;

        self.handle_optional_response(response).await
    }

    /// Submit a parameterized build, returning the queue item id if the server sent one
    pub async fn build_with_parameters(
        &self,
        job: &JobName,
        params: &JobParameters,
    ) -> Result<Option<u64>> {
        let url = format!("{}/buildWithParameters", self.job_url(job));
        let response = self.post(&url).query(params).send().await?;
        let response = self.check_status(response).await?;

        Ok(response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_queue_location))
    }
}

#[async_trait]
impl JobClient for JenkinsClient {
    async fn trigger(&self, job: &JobName, params: &JobParameters) -> Result<RunHandle> {
        let info = self.get_job_info(job).await?;
        let queue_item = self.build_with_parameters(job, params).await?;

        debug!(
            "Triggered {} (predicted #{}, queue item {:?})",
            job, info.next_build_number, queue_item
        );

        let handle = RunHandle::new(job.clone(), info.next_build_number);
        Ok(match queue_item {
            Some(id) => handle.with_queue_item(id),
            None => handle,
        })
    }

    async fn status(&self, handle: &RunHandle) -> Result<RunSnapshot> {
        let Some(build) = self.get_build_info(&handle.job, handle.number).await? else {
            return Ok(RunSnapshot::pending(self.run_url(handle)));
        };

        Ok(snapshot_from_build(handle, build))
    }

    async fn console(&self, handle: &RunHandle) -> Result<String> {
        let url = format!("{}/{}/consoleText", self.job_url(&handle.job), handle.number);
        let response = self.get(&url).send().await?;

        self.handle_text_response(response).await
    }

    fn run_url(&self, handle: &RunHandle) -> String {
        format!("{}/{}/", self.job_url(&handle.job), handle.number)
    }

    async fn resolve(&self, handle: &RunHandle) -> Result<QueueState> {
        let Some(id) = handle.queue_item else {
            return Ok(QueueState::Untracked);
        };

        Ok(queue_state(self.get_queue_item(id).await?))
    }
}

fn queue_state(item: Option<QueueItem>) -> QueueState {
    match item {
        None => QueueState::Untracked,
        Some(QueueItem {
            executable: Some(executable),
            ..
        }) => QueueState::Started(executable.number),
        Some(QueueItem { cancelled: true, .. }) => QueueState::Cancelled,
        Some(_) => QueueState::Waiting,
    }
}

fn snapshot_from_build(handle: &RunHandle, build: BuildInfo) -> RunSnapshot {
    let status = if build.building {
        RunStatus::Running
    } else {
        RunStatus::from_result(build.result.as_deref())
    };

    let artifacts = build
        .artifacts
        .into_iter()
        .map(|a| ArtifactRef {
            file_name: a.file_name,
            relative_path: a.relative_path,
            run: handle.clone(),
        })
        .collect();

    let mut run_url = build.url;
    if !run_url.ends_with('/') {
        run_url.push('/');
    }

    RunSnapshot {
        status,
        artifacts,
        run_url,
    }
}

/// Extracts the id from a `.../queue/item/<id>/` location
fn parse_queue_location(location: &str) -> Option<u64> {
    let mut segments = location.trim_end_matches('/').rsplit('/');
    let id = segments.next()?.parse().ok()?;
    match (segments.next(), segments.next()) {
        (Some("item"), Some("queue")) => Some(id),
        _ => None,
    }
}
