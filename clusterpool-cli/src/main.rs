//! Clusterpool CLI
//!
//! Acquires and tears down ephemeral clusters by driving the pool-management
//! jobs of a Jenkins server.
//!
//! Architecture:
//! - Configuration: flags and environment, read once here
//! - Services: artifact fetching, run monitoring and the cluster lifecycle
//! - Commands: map the selected action onto lifecycle operations
//!
//! Any error reaching `main` is printed and the process exits non-zero.

mod commands;
mod config;
mod connectivity;
mod service;

use anyhow::{Context, Result};
use clap::Parser;
use clusterpool_client::{ClientError, Credentials, JenkinsClient};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Action, handle_action};
use crate::config::{
    Config, DEFAULT_CREATE_JOB, DEFAULT_DESTROY_JOB, DEFAULT_POOL_JOB, DEFAULT_TAKEN_JOB,
    RequestorInfo,
};
use crate::connectivity::ProbeSettings;

#[derive(Parser)]
#[command(name = "clusterpool")]
#[command(about = "Get, create and destroy clusters from a pool", long_about = None)]
struct Cli {
    /// Job server URL
    #[arg(long, env = "POWERVS_JENKINS_URL")]
    jenkins_url: String,

    /// Job server user
    #[arg(long, env = "POWERVS_JENKINS_USER")]
    jenkins_user: String,

    /// Job server API token
    #[arg(long, env = "POWERVS_JENKINS_TOKEN", hide_env_values = true)]
    jenkins_token: String,

    /// Action to run
    #[arg(long, env = "ACTION", value_enum)]
    action: Action,

    /// E-mail of the person requesting the cluster
    #[arg(long, env = "REQUESTOR_EMAIL")]
    requestor_email: Option<String>,

    /// OpenShift version of the cluster
    #[arg(long, env = "OPENSHIFT_VERSION")]
    openshift_version: Option<String>,

    /// Cluster flavor
    #[arg(long, env = "OPENSHIFT_CLUSTER_FLAVOR")]
    cluster_flavor: Option<String>,

    /// Cluster to destroy
    #[arg(long, env = "CLUSTER_ID")]
    cluster_id: Option<String>,

    #[arg(long, env = "CLUSTERPOOL_POOL_JOB", default_value = DEFAULT_POOL_JOB)]
    pool_job: String,

    #[arg(long, env = "CLUSTERPOOL_CREATE_JOB", default_value = DEFAULT_CREATE_JOB)]
    create_job: String,

    #[arg(long, env = "CLUSTERPOOL_DESTROY_JOB", default_value = DEFAULT_DESTROY_JOB)]
    destroy_job: String,

    #[arg(long, env = "CLUSTERPOOL_TAKEN_JOB", default_value = DEFAULT_TAKEN_JOB)]
    taken_job: String,

    /// Directory downloaded artifacts are written to
    #[arg(long, env = "CLUSTERPOOL_SCRATCH_DIR", default_value = "/tmp")]
    scratch_dir: PathBuf,

    /// Directory cluster access details are staged in
    #[arg(long, env = "CLUSTERPOOL_OUTPUT_DIR", default_value = "/tmp/output")]
    output_dir: PathBuf,

    /// Seconds between status queries of a run
    #[arg(long, env = "CLUSTERPOOL_POLL_INTERVAL", default_value_t = 30)]
    poll_interval: u64,

    /// Seconds to wait after triggering a run before querying it
    #[arg(long, env = "CLUSTERPOOL_SETTLE_DELAY", default_value_t = 25)]
    settle_delay: u64,

    /// Settle delay of the create job, in seconds
    #[arg(long, env = "CLUSTERPOOL_CREATE_SETTLE_DELAY", default_value_t = 45)]
    create_settle_delay: u64,

    /// Longest wait on a single run in seconds, 0 waits forever
    #[arg(long, env = "CLUSTERPOOL_MAX_WAIT", default_value_t = 4 * 60 * 60)]
    max_wait: u64,

    /// Timeout of each HTTP request, in seconds
    #[arg(long, env = "CLUSTERPOOL_REQUEST_TIMEOUT", default_value_t = 45)]
    request_timeout: u64,
}

impl Cli {
    fn into_config(self) -> Config {
        let base = Config::new(
            self.jenkins_url,
            Credentials::new(self.jenkins_user, self.jenkins_token),
        );

        Config {
            requestor: RequestorInfo {
                email: self.requestor_email,
                openshift_version: self.openshift_version,
                cluster_flavor: self.cluster_flavor,
                cluster_id: self.cluster_id,
            },
            jobs: config::job_names(
                &self.pool_job,
                &self.create_job,
                &self.destroy_job,
                &self.taken_job,
            ),
            scratch_dir: self.scratch_dir,
            output_dir: self.output_dir,
            poll_interval: Duration::from_secs(self.poll_interval),
            settle_delay: Duration::from_secs(self.settle_delay),
            create_settle_delay: Duration::from_secs(self.create_settle_delay),
            max_wait: (self.max_wait > 0).then(|| Duration::from_secs(self.max_wait)),
            request_timeout: Duration::from_secs(self.request_timeout),
            ..base
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clusterpool=info,clusterpool_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let action = cli.action;
    let config = cli.into_config();
    config.validate().context("Invalid configuration")?;

    connectivity::ensure_reachable(&config.jenkins_url, &ProbeSettings::default())
        .await
        .context("Job server failed to respond, cancelling")?;

    let client = connect(&config).await?;

    handle_action(action, &config, client).await
}

/// Connects to the job server and checks the credentials
async fn connect(config: &Config) -> Result<JenkinsClient> {
    info!("Connecting to {}", config.jenkins_url);

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build the HTTP client")?;
    let client = JenkinsClient::with_client(&config.jenkins_url, config.credentials.clone(), http);

    let user = client.whoami().await.map_err(|e| {
        let reason = greeting_failure(&e);
        anyhow::Error::new(e).context(reason)
    })?;
    let version = client
        .version()
        .await
        .context("Could not read the job server version")?
        .unwrap_or_else(|| "unknown version".to_string());

    info!("Hello {} from Jenkins {}", user.full_name, version);
    Ok(client)
}

/// Explains why the server did not greet us back
fn greeting_failure(error: &ClientError) -> &'static str {
    if error.is_auth_error() {
        "The job server rejected the configured user and token"
    } else {
        "Could not authenticate with the job server"
    }
}
