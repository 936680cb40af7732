//! Commands module
//!
//! Maps the selected action onto the lifecycle operations.

mod cluster;

use anyhow::Result;
use clap::ValueEnum;
use clusterpool_client::JenkinsClient;

use crate::config::Config;

/// Lifecycle action to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Get a cluster from the pool, creating one if the pool is empty
    Create,
    /// Destroy a cluster
    Destroy,
}

/// Handle the selected action
///
/// # Arguments
/// * `action` - The action to execute
/// * `config` - The CLI configuration
/// * `client` - Connected job server client
pub async fn handle_action(action: Action, config: &Config, client: JenkinsClient) -> Result<()> {
    match action {
        Action::Create => cluster::create(config, client).await,
        Action::Destroy => cluster::destroy(config, client).await,
    }
}
