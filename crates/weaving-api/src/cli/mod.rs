//! CLI command definitions for the `weave` binary.
//!
//! Uses clap derive macros for argument parsing. Stored workflows are
//! addressed by id (`import`, `run`); `exec` and `validate` work directly on
//! a graph file.

pub mod exec;
pub mod render;
pub mod workflow;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use serde_json::Value;
use weaving_types::graph::GraphDefinition;

/// Run browser-automation workflows.
#[derive(Parser)]
#[command(name = "weave", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store a graph file under a workflow id (replacing any previous graph).
    Import {
        /// Workflow id to store the graph under.
        workflow_id: String,

        /// Path to the editor's graph JSON.
        file: PathBuf,
    },

    /// Run a stored workflow and follow its log until it finishes.
    Run {
        /// Workflow id.
        workflow_id: String,

        /// Start node parameter as `key=value` (value parsed as JSON when valid).
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Print the run id, then wait silently instead of following the log.
        #[arg(long)]
        detach: bool,
    },

    /// Execute a graph file directly without storing a run record.
    Exec {
        /// Path to the graph JSON.
        file: PathBuf,

        /// Start node parameter as `key=value` (value parsed as JSON when valid).
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Show the status and recent log of a run.
    Status {
        /// Run instance id.
        instance_id: String,
    },

    /// Check a graph file: node configuration, ports and cycles.
    Validate {
        /// Path to the graph JSON.
        file: PathBuf,
    },

    /// Mark runs left `running` by a crashed process as failed.
    Recover,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Parse `key=value`; the value is JSON when it parses, else a plain string.
pub fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn params_map(params: Vec<(String, Value)>) -> HashMap<String, Value> {
    params.into_iter().collect()
}

/// Read and parse a graph JSON file.
pub async fn read_graph(path: &Path) -> Result<GraphDefinition> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    GraphDefinition::from_json(&text).with_context(|| format!("Invalid graph JSON in {}", path.display()))
}
