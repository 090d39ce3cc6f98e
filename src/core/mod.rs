//! Core domain types: job records, schedule metadata, identifiers.

pub mod job;
pub mod schedule;
pub mod types;
