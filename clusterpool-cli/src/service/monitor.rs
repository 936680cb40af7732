//! Run monitor
//!
//! Polls a triggered run until it reaches a terminal status or the wait limit
//! expires.

use clusterpool_client::{JobClient, Result};
use clusterpool_core::domain::job::{
    QueueState, RunHandle, RunOutcome, RunReport, RunSnapshot, RunStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{error, info, warn};

/// Timing of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Sleep after triggering, before the first status query
    pub settle_delay: Duration,
    /// Sleep between status queries
    pub poll_interval: Duration,
    /// Give up after this long; `None` waits forever
    pub max_wait: Option<Duration>,
}

impl MonitorSettings {
    /// Settings with no delays, used by tests
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            max_wait: None,
        }
    }
}

/// Waits on runs of a job client
#[derive(Clone)]
pub struct RunMonitor {
    client: Arc<dyn JobClient>,
}

impl RunMonitor {
    pub fn new(client: Arc<dyn JobClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn JobClient> {
        &self.client
    }

    /// Blocks until `handle` finishes
    ///
    /// Never returns SUCCESS or FAILURE before the server reported it. Transport
    /// errors abort the wait; there is no retry beyond the polling cadence.
    ///
    /// While the trigger's queue item is still waiting, the predicted run number
    /// may belong to someone else, so the queue is asked again on every poll
    /// until it names the run. A cancelled queue item ends the wait as FAILURE.
    pub async fn await_completion(
        &self,
        mut handle: RunHandle,
        settings: &MonitorSettings,
    ) -> Result<RunReport> {
        let started = Instant::now();
        time::sleep(settings.settle_delay).await;

        let mut queued = handle.queue_item.is_some();
        let mut polls = 0u32;

        loop {
            if queued {
                match self.client.resolve(&handle).await? {
                    QueueState::Waiting => {}
                    QueueState::Started(number) => {
                        queued = false;
                        handle = confirm_handle(handle, number);
                    }
                    QueueState::Cancelled => {
                        warn!("{} was cancelled before it started", handle);
                        let snapshot = RunSnapshot {
                            status: RunStatus::Failure,
                            ..RunSnapshot::pending(self.client.run_url(&handle))
                        };
                        return Ok(RunReport {
                            handle,
                            outcome: RunOutcome::Failure,
                            snapshot,
                            polls: polls + 1,
                        });
                    }
                    QueueState::Untracked => queued = false,
                }
            }

            let snapshot = if queued {
                RunSnapshot::pending(self.client.run_url(&handle))
            } else {
                self.client.status(&handle).await?
            };
            polls += 1;
            info!("{} is {} (poll {})", handle, snapshot.status, polls);

            let outcome = if snapshot.status.is_terminal() {
                Some(match snapshot.status {
                    RunStatus::Success => RunOutcome::Success,
                    _ => RunOutcome::Failure,
                })
            } else if settings.max_wait.is_some_and(|max| started.elapsed() >= max) {
                warn!("Gave up waiting on {} after {:?}", handle, started.elapsed());
                Some(RunOutcome::TimedOut)
            } else {
                None
            };

            if let Some(outcome) = outcome {
                return Ok(RunReport {
                    handle,
                    outcome,
                    snapshot,
                    polls,
                });
            }

            time::sleep(settings.poll_interval).await;
        }
    }

    /// Logs the run URL and console output of a run that did not succeed
    pub async fn log_diagnostics(&self, report: &RunReport) {
        error!(
            "{} finished with {}: {}",
            report.handle, report.outcome, report.snapshot.run_url
        );
        match self.client.console(&report.handle).await {
            Ok(console) => error!("Console output of {}:\n{}", report.handle, console),
            Err(e) => warn!("Could not fetch console output of {}: {}", report.handle, e),
        }
    }
}

/// Rebinds the handle when the server assigned a different run number
fn confirm_handle(handle: RunHandle, number: u64) -> RunHandle {
    if number == handle.number {
        return handle;
    }
    warn!(
        "Another run of {} was triggered concurrently: predicted #{}, server assigned #{}",
        handle.job, handle.number, number
    );
    handle.rebind(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{FakeJobClient, ScriptedRun};
    use clusterpool_core::domain::job::{JobName, JobParameters};

    async fn trigger(client: &FakeJobClient, job: &str) -> RunHandle {
        client
            .trigger(&JobName::new(job), &JobParameters::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_polls_until_terminal() {
        let client = Arc::new(FakeJobClient::new());
        client.script(
            "create",
            ScriptedRun::with_statuses(vec![
                RunStatus::Pending,
                RunStatus::Running,
                RunStatus::Running,
                RunStatus::Success,
            ])
            .artifact("cl-1-access-details.tar"),
        );
        let monitor = RunMonitor::new(client.clone());

        let handle = trigger(&client, "create").await;
        let report = monitor
            .await_completion(handle, &MonitorSettings::immediate())
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(report.polls, 4);
        assert_eq!(client.status_calls().len(), 4);
        assert_eq!(client.resolve_calls(), 1);
        assert_eq!(report.snapshot.artifacts.len(), 1);
        assert_eq!(report.snapshot.artifacts[0].file_name, "cl-1-access-details.tar");
    }

    #[tokio::test]
    async fn test_reports_failure() {
        let client = Arc::new(FakeJobClient::new());
        client.script(
            "destroy",
            ScriptedRun::with_statuses(vec![RunStatus::Running, RunStatus::Failure]),
        );
        let monitor = RunMonitor::new(client.clone());

        let handle = trigger(&client, "destroy").await;
        let report = monitor
            .await_completion(handle, &MonitorSettings::immediate())
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Failure);
        assert_eq!(report.polls, 2);
    }

    #[tokio::test]
    async fn test_times_out_on_stuck_run() {
        let client = Arc::new(FakeJobClient::new());
        client.script("pool", ScriptedRun::with_statuses(vec![RunStatus::Running]));
        let monitor = RunMonitor::new(client.clone());

        let settings = MonitorSettings {
            max_wait: Some(Duration::ZERO),
            ..MonitorSettings::immediate()
        };
        let handle = trigger(&client, "pool").await;
        let report = monitor.await_completion(handle, &settings).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::TimedOut);
        assert_eq!(report.polls, 1);
    }

    #[tokio::test]
    async fn test_terminal_status_wins_over_expired_wait() {
        let client = Arc::new(FakeJobClient::new());
        client.script("pool", ScriptedRun::succeeds());
        let monitor = RunMonitor::new(client.clone());

        let settings = MonitorSettings {
            max_wait: Some(Duration::ZERO),
            ..MonitorSettings::immediate()
        };
        let handle = trigger(&client, "pool").await;
        let report = monitor.await_completion(handle, &settings).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Success);
    }

    #[tokio::test]
    async fn test_rebinds_when_server_assigned_another_number() {
        let client = Arc::new(FakeJobClient::new());
        let mut run = ScriptedRun::succeeds();
        run.assigned_number = Some(5);
        client.script("taken", run);
        let monitor = RunMonitor::new(client.clone());

        let handle = trigger(&client, "taken").await;
        assert_eq!(handle.number, 1);

        let report = monitor
            .await_completion(handle, &MonitorSettings::immediate())
            .await
            .unwrap();

        assert_eq!(report.handle.number, 5);
        assert_eq!(report.outcome, RunOutcome::Success);
        assert!(client.status_calls().iter().all(|h| h.number == 5));
    }

    #[tokio::test]
    async fn test_keeps_asking_the_queue_until_the_run_starts() {
        let client = Arc::new(FakeJobClient::new());
        // #1 is somebody else's run that never finishes; ours becomes #2
        client.foreign_run("create", 1, ScriptedRun::with_statuses(vec![RunStatus::Running]));
        let mut run = ScriptedRun::succeeds().queued(vec![
            QueueState::Waiting,
            QueueState::Waiting,
            QueueState::Started(2),
        ]);
        run.assigned_number = Some(2);
        client.script("create", run);
        let monitor = RunMonitor::new(client.clone());

        let settings = MonitorSettings {
            max_wait: Some(Duration::from_secs(30)),
            ..MonitorSettings::immediate()
        };
        let handle = trigger(&client, "create").await;
        assert_eq!(handle.number, 1);
        let report = monitor.await_completion(handle, &settings).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(report.handle.number, 2);
        assert_eq!(report.polls, 3);
        assert_eq!(client.resolve_calls(), 3);
        assert!(client.status_calls().iter().all(|h| h.number == 2));
    }

    #[tokio::test]
    async fn test_cancelled_queue_item_is_failure() {
        let client = Arc::new(FakeJobClient::new());
        client.script(
            "pool",
            ScriptedRun::succeeds().queued(vec![QueueState::Waiting, QueueState::Cancelled]),
        );
        let monitor = RunMonitor::new(client.clone());

        let handle = trigger(&client, "pool").await;
        let report = monitor
            .await_completion(handle, &MonitorSettings::immediate())
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Failure);
        assert_eq!(report.snapshot.status, RunStatus::Failure);
        assert_eq!(report.polls, 2);
        assert!(client.status_calls().is_empty());
    }

    #[tokio::test]
    async fn test_diagnostics_fetch_console() {
        let client = Arc::new(FakeJobClient::new());
        client.script("create", ScriptedRun::fails());
        let monitor = RunMonitor::new(client.clone());

        let handle = trigger(&client, "create").await;
        let report = monitor
            .await_completion(handle, &MonitorSettings::immediate())
            .await
            .unwrap();
        monitor.log_diagnostics(&report).await;

        assert_eq!(client.console_calls(), 1);
    }
}
