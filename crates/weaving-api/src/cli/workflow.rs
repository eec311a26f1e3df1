//! Stored-workflow subcommands: import, run, status, validate, recover.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use serde_json::Value;
use uuid::Uuid;
use weaving_core::repository::workflow::WorkflowRepository;
use weaving_core::workflow::engine::WorkflowEngine;
use weaving_core::workflow::node::{Capabilities, NodeContext};
use weaving_types::graph::GraphDefinition;
use weaving_types::run::{RunLogEntry, RunStatus, StatusReport};

use super::read_graph;
use super::render;
use crate::state::AppState;

/// Interval between status polls while following a run.
const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

/// Build an engine without capabilities to surface configuration errors.
fn check_graph(graph: &GraphDefinition) -> Result<()> {
    WorkflowEngine::from_definition(graph, NodeContext::new("validate", Capabilities::default()))
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("Graph is invalid: {e}"))
}

fn parse_instance_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Invalid run id: '{raw}'"))
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

pub async fn handle_import(state: &AppState, workflow_id: &str, file: &Path, json: bool) -> Result<()> {
    let graph = read_graph(file).await?;
    check_graph(&graph)?;

    state
        .supervisor
        .repository()
        .save_graph(workflow_id, &graph)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save workflow: {e}"))?;

    if json {
        let out = serde_json::json!({
            "workflowId": workflow_id,
            "nodes": graph.nodes.len(),
            "edges": graph.edges.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Imported workflow '{}'",
            style("*").green().bold(),
            style(workflow_id).cyan()
        );
        println!("  Nodes: {}", graph.nodes.len());
        println!("  Edges: {}", graph.edges.len());
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(
    state: &AppState,
    workflow_id: &str,
    params: HashMap<String, Value>,
    detach: bool,
    json: bool,
) -> Result<()> {
    let handle = state
        .supervisor
        .execute_with_params(workflow_id, params)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start workflow '{workflow_id}': {e}"))?;
    let instance_id = handle.instance_id;

    if detach {
        if json {
            println!("{}", serde_json::to_string_pretty(&handle)?);
        } else {
            println!();
            println!(
                "  {} Started run {} of '{}'",
                style("*").green().bold(),
                style(instance_id).cyan(),
                workflow_id
            );
            println!();
        }
        // The run task lives in this process.
        state.supervisor.wait_for(&instance_id).await;
        return Ok(());
    }

    if !json {
        println!();
        println!(
            "  Running '{}' as {} (Ctrl-C to stop)",
            style(workflow_id).cyan(),
            style(render::short_id(&instance_id.to_string())).dim()
        );
        println!();
    }

    let record = follow(state, &instance_id, json).await?;
    state.supervisor.wait_for(&instance_id).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        render::print_record(&weaving_types::run::RunRecord {
            logs: Vec::new(),
            ..record.clone()
        });
    }

    match record.status {
        RunStatus::Completed => Ok(()),
        status => bail!(
            "run {} finished with status {status}{}",
            instance_id,
            record.error.map(|e| format!(": {e}")).unwrap_or_default()
        ),
    }
}

/// Print new log entries until the run is terminal. Ctrl-C requests a stop.
async fn follow(state: &AppState, instance_id: &Uuid, json: bool) -> Result<weaving_types::run::RunRecord> {
    let mut seen: HashSet<(String, String, String, i64)> = HashSet::new();
    let mut stop_requested = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let report = state.supervisor.get_status(instance_id).await?;
        let StatusReport::Run(record) = report else {
            bail!("run {instance_id} disappeared");
        };

        if !json {
            for entry in record.logs.iter().rev() {
                if seen.insert(log_key(entry)) {
                    println!("{}", render::log_line(entry));
                }
            }
        }

        if record.status.is_terminal() {
            return Ok(record);
        }

        tokio::select! {
            _ = tokio::time::sleep(FOLLOW_INTERVAL) => {}
            signal = &mut ctrl_c, if !stop_requested => {
                signal.context("Failed to listen for Ctrl-C")?;
                stop_requested = true;
                tracing::info!(run_id = %instance_id, "stop requested from terminal");
                if let Err(e) = state.supervisor.stop(instance_id).await {
                    tracing::warn!(run_id = %instance_id, error = %e, "stop request failed");
                }
            }
        }
    }
}

fn log_key(entry: &RunLogEntry) -> (String, String, String, i64) {
    (
        entry.node_id.clone(),
        entry.status.to_string(),
        entry.message.clone(),
        entry.timestamp.timestamp_micros(),
    )
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn handle_status(state: &AppState, raw_id: &str, json: bool) -> Result<()> {
    let instance_id = parse_instance_id(raw_id)?;
    let report = state.supervisor.get_status(&instance_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match report {
        StatusReport::NotExecuting => {
            println!();
            println!("  Run '{}' was not executed.", render::short_id(raw_id));
            println!();
        }
        StatusReport::Run(record) => render::print_record(&record),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub async fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let graph = read_graph(file).await?;
    let outcome = check_graph(&graph);

    if json {
        let out = serde_json::json!({
            "valid": outcome.is_ok(),
            "nodes": graph.nodes.len(),
            "edges": graph.edges.len(),
            "error": outcome.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return outcome;
    }

    outcome?;
    println!();
    println!(
        "  {} {} is valid ({} nodes, {} edges)",
        style("*").green().bold(),
        file.display(),
        graph.nodes.len(),
        graph.edges.len()
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Recover
// ---------------------------------------------------------------------------

pub async fn handle_recover(state: &AppState, json: bool) -> Result<()> {
    let recovered = state.supervisor.recover_interrupted().await?;
    if json {
        println!("{}", serde_json::json!({ "recovered": recovered }));
    } else {
        println!();
        println!("  Marked {} interrupted run(s) as failed.", style(recovered).bold());
        println!();
    }
    Ok(())
}
