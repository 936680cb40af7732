//! Core domain types
//!
//! Runs and artifacts are observed on the remote job server; cluster records are
//! rebuilt from those artifacts on every invocation and never persisted locally.

pub mod cluster;
pub mod job;
