//! Service layer
//!
//! Business logic of the CLI: fetching artifacts, waiting on runs and the
//! cluster lifecycle built on top of them.
//!
//! Collaborators are trait objects so the orchestrator can run against fakes.

mod artifacts;
mod error;
mod lifecycle;
mod monitor;

#[cfg(test)]
mod testing;

pub use artifacts::HttpArtifactFetcher;
pub use lifecycle::{ClusterLifecycle, DestroyReport, JobNames, LifecycleSettings};
pub use monitor::{MonitorSettings, RunMonitor};
