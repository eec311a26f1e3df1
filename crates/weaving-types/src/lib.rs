//! Shared domain types for Weaving Flow.
//!
//! This crate contains the types exchanged between the engine, its
//! collaborators and the CLI: the graph wire format produced by the editor,
//! per-node configuration, action-script items, run records, and config.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod action;
pub mod browser;
pub mod config;
pub mod error;
pub mod graph;
pub mod node;
pub mod notify;
pub mod run;
