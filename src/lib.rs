//! `Testudo` - multi-phase security assessment coordinator
//!
//! Dispatches each assessment phase (recon, scan, exploit, post-exploit)
//! to its remote execution service, aggregates the per-phase outcomes
//! under partial failure, optionally enriches them with advisory text,
//! and persists a JSON report plus a declarative playbook.

pub mod advisory;
pub mod aggregate;
pub mod artifact;
pub mod cli;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod phase;
pub mod record;
pub mod selection;
pub mod target;
pub mod templates;
