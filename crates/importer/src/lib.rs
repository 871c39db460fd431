//! Workload importer service
//!
//! HTTP front end over [`importer_lib::Orchestrator`], plus the
//! environment-driven configuration of the binary.

pub mod api;
pub mod config;
