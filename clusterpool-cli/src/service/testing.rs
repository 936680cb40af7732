//! In-memory fakes of the job server and artifact fetcher

use async_trait::async_trait;
use clusterpool_client::JobClient;
use clusterpool_core::domain::job::{
    ArtifactRef, JobName, JobParameters, QueueState, RunHandle, RunSnapshot, RunStatus,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

use crate::service::artifacts::{self, ArtifactFetcher};
use crate::service::error::ArtifactError;

/// Script for one triggered run
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    /// Statuses returned by successive polls; the last one repeats
    pub statuses: Vec<RunStatus>,
    /// `(file_name, relative_path)` of the artifacts
    pub artifacts: Vec<(String, String)>,
    /// Run number the queue item resolves to, if different from the prediction
    pub assigned_number: Option<u64>,
    /// Answers of successive queue lookups; the last one repeats. Empty means
    /// the run started right away.
    pub queue: Vec<QueueState>,
}

impl ScriptedRun {
    pub fn succeeds() -> Self {
        Self::with_statuses(vec![RunStatus::Success])
    }

    pub fn fails() -> Self {
        Self::with_statuses(vec![RunStatus::Failure])
    }

    pub fn with_statuses(statuses: Vec<RunStatus>) -> Self {
        Self {
            statuses,
            artifacts: Vec::new(),
            assigned_number: None,
            queue: Vec::new(),
        }
    }

    pub fn queued(mut self, queue: Vec<QueueState>) -> Self {
        self.queue = queue;
        self
    }

    pub fn artifact(mut self, file_name: &str) -> Self {
        self.artifacts
            .push((file_name.to_string(), format!("out/{}", file_name)));
        self
    }
}

#[derive(Default)]
struct FakeState {
    scripts: HashMap<JobName, VecDeque<ScriptedRun>>,
    next_number: HashMap<JobName, u64>,
    runs: HashMap<(JobName, u64), (ScriptedRun, usize)>,
    queues: HashMap<(JobName, u64), (Vec<QueueState>, usize)>,
    resolve_calls: usize,
    triggers: Vec<(JobName, JobParameters)>,
    status_calls: Vec<RunHandle>,
    console_calls: Vec<RunHandle>,
}

/// Job server fake; unscripted triggers succeed immediately without artifacts
#[derive(Default)]
pub struct FakeJobClient {
    state: Mutex<FakeState>,
}

impl FakeJobClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, job: &str, run: ScriptedRun) -> &Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(JobName::new(job))
            .or_default()
            .push_back(run);
        self
    }

    /// Registers a run nobody triggered through this client
    pub fn foreign_run(&self, job: &str, number: u64, run: ScriptedRun) -> &Self {
        self.state
            .lock()
            .unwrap()
            .runs
            .insert((JobName::new(job), number), (run, 0));
        self
    }

    pub fn triggers(&self) -> Vec<(JobName, JobParameters)> {
        self.state.lock().unwrap().triggers.clone()
    }

    pub fn triggered_jobs(&self) -> Vec<String> {
        self.triggers()
            .into_iter()
            .map(|(job, _)| job.to_string())
            .collect()
    }

    pub fn status_calls(&self) -> Vec<RunHandle> {
        self.state.lock().unwrap().status_calls.clone()
    }

    pub fn console_calls(&self) -> usize {
        self.state.lock().unwrap().console_calls.len()
    }

    pub fn resolve_calls(&self) -> usize {
        self.state.lock().unwrap().resolve_calls
    }

    pub fn url_of(job: &str, number: u64) -> String {
        format!("https://ci.test/job/{}/{}/", job, number)
    }
}

#[async_trait]
impl JobClient for FakeJobClient {
    async fn trigger(
        &self,
        job: &JobName,
        params: &JobParameters,
    ) -> clusterpool_client::Result<RunHandle> {
        let mut state = self.state.lock().unwrap();
        let number = {
            let next = state.next_number.entry(job.clone()).or_insert(1);
            let number = *next;
            *next += 1;
            number
        };
        let script = state
            .scripts
            .get_mut(job)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(ScriptedRun::succeeds);

        // The run exists under the number the server really assigned
        let actual = script.assigned_number.unwrap_or(number);
        let queue = if script.queue.is_empty() {
            vec![QueueState::Started(actual)]
        } else {
            script.queue.clone()
        };
        state.queues.insert((job.clone(), number), (queue, 0));
        state.runs.insert((job.clone(), actual), (script, 0));
        state.triggers.push((job.clone(), params.clone()));

        Ok(RunHandle::new(job.clone(), number).with_queue_item(number))
    }

    async fn status(&self, handle: &RunHandle) -> clusterpool_client::Result<RunSnapshot> {
        let mut state = self.state.lock().unwrap();
        state.status_calls.push(handle.clone());

        let run_url = Self::url_of(handle.job.as_str(), handle.number);
        let Some((script, polled)) = state.runs.get_mut(&(handle.job.clone(), handle.number))
        else {
            return Ok(RunSnapshot::pending(run_url));
        };

        let index = (*polled).min(script.statuses.len().saturating_sub(1));
        let status = script.statuses.get(index).copied().unwrap_or(RunStatus::Success);
        *polled += 1;

        let artifacts = script
            .artifacts
            .iter()
            .map(|(file_name, relative_path)| ArtifactRef {
                file_name: file_name.clone(),
                relative_path: relative_path.clone(),
                run: handle.clone(),
            })
            .collect();

        Ok(RunSnapshot {
            status,
            artifacts,
            run_url,
        })
    }

    async fn console(&self, handle: &RunHandle) -> clusterpool_client::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.console_calls.push(handle.clone());
        Ok(format!("console output of {}", handle))
    }

    fn run_url(&self, handle: &RunHandle) -> String {
        Self::url_of(handle.job.as_str(), handle.number)
    }

    async fn resolve(&self, handle: &RunHandle) -> clusterpool_client::Result<QueueState> {
        let mut state = self.state.lock().unwrap();
        state.resolve_calls += 1;

        let Some(queue_item) = handle.queue_item else {
            return Ok(QueueState::Untracked);
        };
        let Some((answers, asked)) = state.queues.get_mut(&(handle.job.clone(), queue_item))
        else {
            return Ok(QueueState::Untracked);
        };

        let index = (*asked).min(answers.len().saturating_sub(1));
        *asked += 1;
        Ok(answers.get(index).copied().unwrap_or(QueueState::Untracked))
    }
}

/// Fetcher fake serving files from memory
pub struct FakeFetcher {
    dir: TempDir,
    files: Mutex<HashMap<String, String>>,
    broken_archives: Mutex<HashSet<String>>,
    fetched: Mutex<Vec<String>>,
    unpacked: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            files: Mutex::new(HashMap::new()),
            broken_archives: Mutex::new(HashSet::new()),
            fetched: Mutex::new(Vec::new()),
            unpacked: Mutex::new(Vec::new()),
        }
    }

    pub fn serve(&self, url: &str, content: &str) -> &Self {
        self.files
            .lock()
            .unwrap()
            .insert(url.to_string(), content.to_string());
        self
    }

    /// Makes `fetch_and_unpack` of `url` fail with a layout error
    pub fn break_archive(&self, url: &str) -> &Self {
        self.broken_archives.lock().unwrap().insert(url.to_string());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn unpacked(&self) -> Vec<String> {
        self.unpacked.lock().unwrap().clone()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("output")
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> artifacts::Result<PathBuf> {
        self.fetched.lock().unwrap().push(url.to_string());

        let content = self.files.lock().unwrap().get(url).cloned();
        let Some(content) = content else {
            return Err(ArtifactError::Download {
                url: url.to_string(),
                status: 404,
            });
        };

        let name = artifacts::file_name_from_url(url)
            .ok_or_else(|| ArtifactError::InvalidUrl(url.to_string()))?;
        let path = self.dir.path().join(&name);
        std::fs::write(&path, content).map_err(|e| ArtifactError::io(&path, e))?;
        Ok(path)
    }

    async fn fetch_and_unpack(&self, url: &str) -> artifacts::Result<PathBuf> {
        self.unpacked.lock().unwrap().push(url.to_string());

        if self.broken_archives.lock().unwrap().contains(url) {
            return Err(ArtifactError::ArchiveLayout {
                archive: self.dir.path().join("broken.tar"),
                expected: "broken".to_string(),
                found: vec!["other".to_string()],
            });
        }
        Ok(self.output_dir())
    }
}
