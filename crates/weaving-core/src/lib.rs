//! Workflow engine and capability traits for Weaving Flow.
//!
//! This crate defines the "ports" (browser, notification and repository
//! traits) that the infrastructure layer implements, plus everything that
//! runs a workflow: node variants, the action-script interpreter, the graph
//! engine and the run supervisor. It depends only on `weaving-types` --
//! never on `weaving-infra` or any browser/database crate.

pub mod browser;
pub mod notify;
pub mod repository;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;
