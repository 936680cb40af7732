//! Cluster domain types
//!
//! The remote pool-management jobs are the system of record. A `ClusterRecord`
//! only describes what this invocation learned from run artifacts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// File name suffix of the pool query's info artifact
pub const POOL_INFO_SUFFIX: &str = ".info";

/// File name suffix of a cluster access archive
pub const CLUSTER_ARCHIVE_SUFFIX: &str = ".tar";

/// Naming convention of archives produced by the create job
pub const ACCESS_DETAILS_SUFFIX: &str = "-access-details.tar";

/// Sentinel written by the pool query when no cluster is available
pub const EMPTY_POOL_SENTINEL: &str = "none";

/// Allocation state of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationState {
    InPool,
    Allocated,
    Destroyed,
}

impl fmt::Display for AllocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllocationState::InPool => "IN_POOL",
            AllocationState::Allocated => "ALLOCATED",
            AllocationState::Destroyed => "DESTROYED",
        };
        f.write_str(s)
    }
}

/// Where an acquired cluster came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterSource {
    /// Taken from the pool of pre-provisioned clusters
    Pool,
    /// Freshly created because the pool had nothing to offer
    Created,
}

/// What is known about a cluster during one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub cluster_id: String,
    /// URL of the access archive the cluster was obtained from
    pub access_artifact: String,
    pub state: AllocationState,
}

impl ClusterRecord {
    pub fn in_pool(cluster_id: impl Into<String>, access_artifact: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            access_artifact: access_artifact.into(),
            state: AllocationState::InPool,
        }
    }

    pub fn mark_allocated(&mut self) {
        self.state = AllocationState::Allocated;
    }
}

/// A cluster handed to the caller, with its access details staged locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub record: ClusterRecord,
    pub source: ClusterSource,
    /// Directory holding the unpacked access details
    pub staged_dir: PathBuf,
}

/// Content of the pool query's info artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolQueryResult {
    /// No cluster is available in the pool
    Empty,
    /// A cluster is available together with its access archive
    Hit {
        cluster_id: String,
        artifact_url: String,
    },
}

/// Reasons an info line could not be interpreted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolInfoError {
    #[error("pool info is empty")]
    Blank,
    #[error("pool info has no comma separating cluster id and artifact url: {0:?}")]
    MissingSeparator(String),
    #[error("pool info has an empty field: {0:?}")]
    EmptyField(String),
}

impl PoolQueryResult {
    /// Parses the first line of a pool info artifact
    ///
    /// Accepts the literal `none` or `cluster_id,artifact_url`; only the first
    /// comma separates the fields.
    pub fn parse(line: &str) -> Result<Self, PoolInfoError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(PoolInfoError::Blank);
        }
        if line == EMPTY_POOL_SENTINEL {
            return Ok(PoolQueryResult::Empty);
        }

        let (cluster_id, artifact_url) = line
            .split_once(',')
            .ok_or_else(|| PoolInfoError::MissingSeparator(line.to_string()))?;
        let cluster_id = cluster_id.trim();
        let artifact_url = artifact_url.trim();

        if cluster_id.is_empty() || artifact_url.is_empty() {
            return Err(PoolInfoError::EmptyField(line.to_string()));
        }

        Ok(PoolQueryResult::Hit {
            cluster_id: cluster_id.to_string(),
            artifact_url: artifact_url.to_string(),
        })
    }
}

/// Derives the cluster id from an access archive's file name
///
/// Returns `None` when the name does not carry the archive suffix.
pub fn cluster_id_from_archive(file_name: &str) -> Option<&str> {
    let id = file_name
        .strip_suffix(ACCESS_DETAILS_SUFFIX)
        .or_else(|| file_name.strip_suffix(CLUSTER_ARCHIVE_SUFFIX))?;
    (!id.is_empty()).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_pool() {
        assert_eq!(PoolQueryResult::parse("none\n"), Ok(PoolQueryResult::Empty));
        assert_eq!(PoolQueryResult::parse("  none  "), Ok(PoolQueryResult::Empty));
    }

    #[test]
    fn test_parse_hit() {
        let parsed =
            PoolQueryResult::parse("cl-1234,https://host/job/42/artifact/cl-1234.tar\n").unwrap();
        assert_eq!(
            parsed,
            PoolQueryResult::Hit {
                cluster_id: "cl-1234".to_string(),
                artifact_url: "https://host/job/42/artifact/cl-1234.tar".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_splits_on_first_comma_only() {
        let parsed = PoolQueryResult::parse("cl-1,https://host/a?x=1,2").unwrap();
        assert_eq!(
            parsed,
            PoolQueryResult::Hit {
                cluster_id: "cl-1".to_string(),
                artifact_url: "https://host/a?x=1,2".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_does_not_substring_match_sentinel() {
        // A cluster whose id happens to contain "none" is still a hit
        let parsed = PoolQueryResult::parse("nonexistent-7,https://host/x.tar").unwrap();
        assert!(matches!(parsed, PoolQueryResult::Hit { .. }));

        assert!(matches!(
            PoolQueryResult::parse("None"),
            Err(PoolInfoError::MissingSeparator(_))
        ));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(PoolQueryResult::parse(""), Err(PoolInfoError::Blank));
        assert!(matches!(
            PoolQueryResult::parse(",https://host/x.tar"),
            Err(PoolInfoError::EmptyField(_))
        ));
        assert!(matches!(
            PoolQueryResult::parse("cl-1,"),
            Err(PoolInfoError::EmptyField(_))
        ));
    }

    #[test]
    fn test_cluster_id_from_archive() {
        assert_eq!(
            cluster_id_from_archive("cl-5678-access-details.tar"),
            Some("cl-5678")
        );
        assert_eq!(cluster_id_from_archive("cl-5678.tar"), Some("cl-5678"));
        assert_eq!(cluster_id_from_archive("notes.txt"), None);
        assert_eq!(cluster_id_from_archive(".tar"), None);
    }

    #[test]
    fn test_record_allocation() {
        let mut record = ClusterRecord::in_pool("cl-1", "https://host/cl-1.tar");
        assert_eq!(record.state, AllocationState::InPool);
        record.mark_allocated();
        assert_eq!(record.state.to_string(), "ALLOCATED");
    }
}
