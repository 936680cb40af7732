//! Data Transfer Objects (DTOs)
//!
//! Payloads returned by the job server's JSON API.

pub mod jenkins;
