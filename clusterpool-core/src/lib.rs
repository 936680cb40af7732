//! Clusterpool Core
//!
//! Core types shared by the clusterpool client and CLI.
//!
//! This crate contains:
//! - Domain types: jobs, runs, artifacts and cluster records
//! - DTOs: the job server's JSON payloads

pub mod domain;
pub mod dto;
