//! Cluster command handlers

use anyhow::{Context, Result};
use clusterpool_client::JenkinsClient;
use clusterpool_core::domain::cluster::{Acquisition, ClusterSource};
use colored::*;
use std::sync::Arc;

use crate::config::Config;
use crate::service::{ClusterLifecycle, DestroyReport, HttpArtifactFetcher, RunMonitor};

/// Wires the lifecycle orchestrator to the real job server and downloader
fn lifecycle(config: &Config, client: JenkinsClient) -> Result<ClusterLifecycle> {
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build the download client")?;
    let fetcher = HttpArtifactFetcher::new(
        http,
        client.credentials().clone(),
        config.scratch_dir.clone(),
        config.output_dir.clone(),
    );

    Ok(ClusterLifecycle::new(
        RunMonitor::new(Arc::new(client)),
        Arc::new(fetcher),
        config.lifecycle_settings(),
    ))
}

/// Acquire a cluster and report where its access details are
pub async fn create(config: &Config, client: JenkinsClient) -> Result<()> {
    let acquisition = lifecycle(config, client)?
        .acquire()
        .await
        .context("Could not acquire a cluster")?;

    print_acquisition(&acquisition);
    Ok(())
}

/// Destroy the configured cluster
pub async fn destroy(config: &Config, client: JenkinsClient) -> Result<()> {
    let report = lifecycle(config, client)?
        .destroy(config.requestor.cluster_id.as_deref())
        .await
        .context("Could not request the cluster destroy")?;

    print_destroy(&report);
    Ok(())
}

fn print_acquisition(acquisition: &Acquisition) {
    let origin = match acquisition.source {
        ClusterSource::Pool => "taken from the pool",
        ClusterSource::Created => "created",
    };

    println!(
        "{} {} ({})",
        "Cluster".green().bold(),
        acquisition.record.cluster_id.cyan(),
        origin
    );
    println!("  {} {}", "State:".bold(), acquisition.record.state);
    println!(
        "  {} {}",
        "Access details:".bold(),
        acquisition.staged_dir.display()
    );
}

fn print_destroy(report: &DestroyReport) {
    let target = report.cluster_id.as_deref().unwrap_or("requested cluster");

    if let Some(state) = report.state() {
        println!("{} {}", "Destroyed".green().bold(), target.cyan());
        println!("  {} {}", "State:".bold(), state);
    } else {
        println!(
            "{} {} ({}), the garbage collector will reclaim it within 12-24 hours",
            "Not destroyed".yellow().bold(),
            target.cyan(),
            report.outcome
        );
        println!("  {} {}", "Run:".bold(), report.run_url);
    }
}
