//! Cluster lifecycle orchestrator
//!
//! Chains pool-management runs into the three operations callers need:
//! acquire (get from pool, or create), mark as allocated, and destroy.
//! Runs are issued one at a time; each is awaited before the next is triggered.

use clusterpool_core::domain::cluster::{
    Acquisition, AllocationState, ClusterRecord, ClusterSource, POOL_INFO_SUFFIX,
    PoolQueryResult, cluster_id_from_archive,
};
use clusterpool_core::domain::job::{JobName, JobParameters, RunOutcome, RunReport};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::service::artifacts::ArtifactFetcher;
use crate::service::error::{LifecycleError, PoolQueryError};
use crate::service::monitor::{MonitorSettings, RunMonitor};

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Parameter naming the cluster a pool job acts on
pub const CLUSTER_ID_PARAM: &str = "CLUSTER_ID";

/// Names of the pool-management jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNames {
    /// Looks for an available cluster in the pool
    pub pool: JobName,
    /// Creates a new cluster
    pub create: JobName,
    pub destroy: JobName,
    /// Marks a pool cluster as allocated
    pub taken: JobName,
}

/// Everything the orchestrator needs besides its collaborators
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub jobs: JobNames,
    /// Requestor metadata sent to the pool, create and implicit destroy jobs
    pub requestor: JobParameters,
    pub monitor: MonitorSettings,
    /// Monitor settings for the create job, which takes longer to get going
    pub create_monitor: MonitorSettings,
}

/// Outcome of a destroy request; a failed destroy is not an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyReport {
    /// Cluster named explicitly, `None` when the job picked it from the requestor data
    pub cluster_id: Option<String>,
    pub outcome: RunOutcome,
    pub run_url: String,
}

impl DestroyReport {
    pub fn is_destroyed(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    /// State the cluster is known to be in, if the run settled it
    pub fn state(&self) -> Option<AllocationState> {
        self.is_destroyed().then_some(AllocationState::Destroyed)
    }
}

pub struct ClusterLifecycle {
    monitor: RunMonitor,
    fetcher: Arc<dyn ArtifactFetcher>,
    settings: LifecycleSettings,
}

impl ClusterLifecycle {
    pub fn new(
        monitor: RunMonitor,
        fetcher: Arc<dyn ArtifactFetcher>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            monitor,
            fetcher,
            settings,
        }
    }

    /// Gets a cluster from the pool, creating one when the pool has none
    ///
    /// A broken pool query never blocks creation; it is treated like an empty
    /// pool.
    pub async fn acquire(&self) -> Result<Acquisition> {
        if let Some(acquisition) = self.take_from_pool().await? {
            return Ok(acquisition);
        }
        self.create().await
    }

    /// Destroys a cluster
    ///
    /// Without an id the destroy job derives its target from the requestor
    /// parameters. Only transport errors are returned as `Err`; a run that fails
    /// or times out is reported and left to the pool's garbage collector.
    pub async fn destroy(&self, cluster_id: Option<&str>) -> Result<DestroyReport> {
        let params = match cluster_id {
            Some(id) => {
                info!("Destroying the cluster {}", id);
                cluster_params(id)
            }
            None => {
                match self.settings.requestor.get(CLUSTER_ID_PARAM) {
                    Some(id) => info!("Destroying the cluster {}", id),
                    None => info!("Destroying the cluster selected by the requestor data"),
                }
                self.settings.requestor.clone()
            }
        };

        let report = self
            .run(&self.settings.jobs.destroy, &params, &self.settings.monitor)
            .await?;

        match report.outcome {
            RunOutcome::Success => info!("Destroy run {} completed", report.handle),
            RunOutcome::Failure | RunOutcome::TimedOut => {
                error!("Cluster was NOT destroyed");
                warn!("The pool's garbage collector will destroy it within 12-24 hours");
                self.monitor.log_diagnostics(&report).await;
            }
        }

        Ok(DestroyReport {
            cluster_id: cluster_id.map(str::to_string),
            outcome: report.outcome,
            run_url: report.snapshot.run_url,
        })
    }

    /// Marks a cluster as allocated in the pool's bookkeeping
    ///
    /// When this fails the caller already holds the access details but the pool
    /// still lists the cluster as available.
    pub async fn mark_taken(&self, record: &mut ClusterRecord) -> Result<()> {
        info!("Setting cluster {} as taken", record.cluster_id);
        let report = self
            .run(
                &self.settings.jobs.taken,
                &cluster_params(&record.cluster_id),
                &self.settings.monitor,
            )
            .await?;

        match report.outcome {
            RunOutcome::Success => {
                record.mark_allocated();
                info!("Cluster {} is {}", record.cluster_id, record.state);
                Ok(())
            }
            RunOutcome::Failure => {
                self.monitor.log_diagnostics(&report).await;
                Err(LifecycleError::run_failed(&report))
            }
            RunOutcome::TimedOut => Err(timed_out(&report, &self.settings.monitor)),
        }
    }

    async fn take_from_pool(&self) -> Result<Option<Acquisition>> {
        info!("Trying to get a cluster from the pool");
        let report = self
            .run(
                &self.settings.jobs.pool,
                &self.settings.requestor,
                &self.settings.monitor,
            )
            .await?;

        match report.outcome {
            RunOutcome::Success => {}
            RunOutcome::Failure => {
                error!("The pool query failed, a new cluster will be created");
                self.monitor.log_diagnostics(&report).await;
                return Ok(None);
            }
            RunOutcome::TimedOut => {
                warn!("The pool query did not finish, a new cluster will be created");
                return Ok(None);
            }
        }

        let (cluster_id, artifact_url) = match self.read_pool_info(&report).await {
            Ok(PoolQueryResult::Hit {
                cluster_id,
                artifact_url,
            }) => (cluster_id, artifact_url),
            Ok(PoolQueryResult::Empty) => {
                warn!("The pool is empty, a new cluster will be created");
                return Ok(None);
            }
            Err(e) => {
                error!("Could not read the pool information: {}", e);
                warn!("A new cluster will be created");
                return Ok(None);
            }
        };

        info!("Cluster {} is available in the pool", cluster_id);
        let staged_dir = self.fetcher.fetch_and_unpack(&artifact_url).await?;

        let mut record = ClusterRecord::in_pool(cluster_id, artifact_url);
        self.mark_taken(&mut record).await?;

        Ok(Some(Acquisition {
            record,
            source: ClusterSource::Pool,
            staged_dir,
        }))
    }

    async fn read_pool_info(
        &self,
        report: &RunReport,
    ) -> std::result::Result<PoolQueryResult, PoolQueryError> {
        let infos = report.snapshot.artifacts_with_suffix(POOL_INFO_SUFFIX);
        let [info] = infos.as_slice() else {
            return Err(PoolQueryError::InfoArtifactCount(infos.len()));
        };

        let path = self
            .fetcher
            .fetch(&report.snapshot.artifact_url(info))
            .await?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| PoolQueryError::Read {
                path: path.clone(),
                source,
            })?;

        Ok(PoolQueryResult::parse(content.lines().next().unwrap_or(""))?)
    }

    async fn create(&self) -> Result<Acquisition> {
        info!("Creating a new cluster");
        let report = self
            .run(
                &self.settings.jobs.create,
                &self.settings.requestor,
                &self.settings.create_monitor,
            )
            .await?;

        match report.outcome {
            RunOutcome::Success => info!("Create run {} completed", report.handle),
            RunOutcome::Failure => {
                error!("Could not create a new cluster");
                self.monitor.log_diagnostics(&report).await;
                return Err(LifecycleError::run_failed(&report));
            }
            RunOutcome::TimedOut => {
                warn!("A cluster may still be created; the pool's garbage collector will reclaim it");
                return Err(timed_out(&report, &self.settings.create_monitor));
            }
        }

        let archives: Vec<_> = report
            .snapshot
            .artifacts
            .iter()
            .filter_map(|a| cluster_id_from_archive(&a.file_name).map(|id| (a, id)))
            .collect();

        let [(archive, cluster_id)] = archives.as_slice() else {
            error!("Could not find the cluster access details");
            warn!("Deleting allocated resources");
            self.compensate(None).await;
            return Err(LifecycleError::MissingClusterArchive {
                job: report.handle.job.clone(),
                number: report.handle.number,
                found: archives.len(),
            });
        };

        let artifact_url = report.snapshot.artifact_url(archive);
        let staged_dir = match self.fetcher.fetch_and_unpack(&artifact_url).await {
            Ok(dir) => dir,
            Err(e) => {
                error!("Could not stage the access details of {}: {}", cluster_id, e);
                warn!("Deleting allocated resources");
                self.compensate(Some(*cluster_id)).await;
                return Err(e.into());
            }
        };

        let mut record = ClusterRecord::in_pool(*cluster_id, artifact_url);
        self.mark_taken(&mut record).await?;

        Ok(Acquisition {
            record,
            source: ClusterSource::Created,
            staged_dir,
        })
    }

    /// Best-effort destroy of a cluster that cannot be handed out
    async fn compensate(&self, cluster_id: Option<&str>) {
        if let Err(e) = self.destroy(cluster_id).await {
            error!("Could not request the destroy of the unusable cluster: {}", e);
        }
    }

    async fn run(
        &self,
        job: &JobName,
        params: &JobParameters,
        settings: &MonitorSettings,
    ) -> Result<RunReport> {
        let handle = self.monitor.client().trigger(job, params).await?;
        info!("Triggered {}", handle);
        Ok(self.monitor.await_completion(handle, settings).await?)
    }
}

fn timed_out(report: &RunReport, settings: &MonitorSettings) -> LifecycleError {
    LifecycleError::run_timed_out(report, settings.max_wait.unwrap_or_default())
}

fn cluster_params(cluster_id: &str) -> JobParameters {
    JobParameters::from([(CLUSTER_ID_PARAM.to_string(), cluster_id.to_string())])
}
