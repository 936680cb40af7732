//! CLI configuration
//!
//! Built once in `main` from flags and environment, validated, then passed by
//! reference. Nothing below the entry point reads the process environment.

use clusterpool_client::Credentials;
use clusterpool_core::domain::job::{JobName, JobParameters};
use std::path::PathBuf;
use std::time::Duration;

use crate::service::{JobNames, LifecycleSettings, MonitorSettings};

pub const DEFAULT_POOL_JOB: &str = "ibmcloud-powervs-pool-of-clusters/get-cluster-from-pool";
pub const DEFAULT_CREATE_JOB: &str = "ibmcloud-powervs-pool-of-clusters/populate-pool";
pub const DEFAULT_DESTROY_JOB: &str = "ibmcloud-powervs-pool-of-clusters/destroy-cluster";
pub const DEFAULT_TAKEN_JOB: &str =
    "ibmcloud-powervs-pool-of-clusters/set-cluster-from-pool-as-allocated";

/// Job names with folder paths, as given on the command line
pub fn job_names(pool: &str, create: &str, destroy: &str, taken: &str) -> JobNames {
    JobNames {
        pool: JobName::new(pool),
        create: JobName::new(create),
        destroy: JobName::new(destroy),
        taken: JobName::new(taken),
    }
}

/// Who is asking for a cluster, and what kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestorInfo {
    pub email: Option<String>,
    pub openshift_version: Option<String>,
    pub cluster_flavor: Option<String>,
    /// Cluster to destroy when no explicit id is given
    pub cluster_id: Option<String>,
}

impl RequestorInfo {
    /// Job parameters for the pool, create and implicit destroy jobs
    ///
    /// Unset values are left out so the remote job applies its own defaults.
    pub fn parameters(&self) -> JobParameters {
        [
            ("REQUESTOR_EMAIL", &self.email),
            ("OPENSHIFT_VERSION", &self.openshift_version),
            ("OPENSHIFT_CLUSTER_FLAVOR", &self.cluster_flavor),
            ("CLUSTER_ID", &self.cluster_id),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|v| (name.to_string(), v)))
        .collect()
    }
}

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the job server
    pub jenkins_url: String,
    pub credentials: Credentials,
    pub requestor: RequestorInfo,
    pub jobs: JobNames,

    /// Where downloaded artifacts land
    pub scratch_dir: PathBuf,
    /// Where cluster access details are staged
    pub output_dir: PathBuf,

    /// How often to query a run's status
    pub poll_interval: Duration,
    /// Wait after triggering a run before the first query
    pub settle_delay: Duration,
    /// Settle delay for the create job
    pub create_settle_delay: Duration,
    /// Longest wait on a single run; `None` waits forever
    pub max_wait: Option<Duration>,

    /// Timeout of each HTTP request
    pub request_timeout: Duration,
}

impl Config {
    /// Creates a configuration with defaults for everything but the server
    pub fn new(jenkins_url: String, credentials: Credentials) -> Self {
        Self {
            jenkins_url,
            credentials,
            requestor: RequestorInfo::default(),
            jobs: job_names(
                DEFAULT_POOL_JOB,
                DEFAULT_CREATE_JOB,
                DEFAULT_DESTROY_JOB,
                DEFAULT_TAKEN_JOB,
            ),
            scratch_dir: PathBuf::from("/tmp"),
            output_dir: PathBuf::from("/tmp/output"),
            poll_interval: Duration::from_secs(30),
            settle_delay: Duration::from_secs(25),
            create_settle_delay: Duration::from_secs(45),
            max_wait: Some(Duration::from_secs(4 * 60 * 60)),
            request_timeout: Duration::from_secs(45),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jenkins_url.is_empty() {
            anyhow::bail!("jenkins_url cannot be empty");
        }

        if !self.jenkins_url.starts_with("http://") && !self.jenkins_url.starts_with("https://") {
            anyhow::bail!("jenkins_url must start with http:// or https://");
        }

        if self.credentials.user.is_empty() {
            anyhow::bail!("jenkins user cannot be empty");
        }

        if self.credentials.token.is_empty() {
            anyhow::bail!("jenkins token cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        for job in [
            &self.jobs.pool,
            &self.jobs.create,
            &self.jobs.destroy,
            &self.jobs.taken,
        ] {
            if job.segments().next().is_none() {
                anyhow::bail!("job names cannot be empty");
            }
        }

        Ok(())
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            settle_delay: self.settle_delay,
            poll_interval: self.poll_interval,
            max_wait: self.max_wait,
        }
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        let monitor = self.monitor_settings();
        LifecycleSettings {
            jobs: self.jobs.clone(),
            requestor: self.requestor.parameters(),
            monitor,
            create_monitor: MonitorSettings {
                settle_delay: self.create_settle_delay,
                ..monitor
            },
        }
    }
}
