//! `weave exec`: run a graph file directly on the engine, without the
//! workflow store or run records.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use serde_json::Value;
use weaving_core::workflow::engine::WorkflowEngine;
use weaving_core::workflow::node::NodeContext;
use weaving_types::config::WeaveConfig;

use super::read_graph;
use crate::state::capabilities;

pub async fn handle_exec(
    config: &WeaveConfig,
    file: &Path,
    params: HashMap<String, Value>,
    json: bool,
) -> Result<()> {
    let graph = read_graph(file).await?;
    let flow_name = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string());

    let ctx = NodeContext::new(flow_name, capabilities(config));
    let cancel = ctx.cancel.clone();
    let engine = WorkflowEngine::from_definition(&graph, ctx)
        .map_err(|e| anyhow::anyhow!("Graph is invalid: {e}"))?;

    let run = engine.execute(params);
    tokio::pin!(run);
    let outcome = tokio::select! {
        result = &mut run => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("stop requested from terminal");
            cancel.cancel();
            run.await
        }
    };
    engine.cleanup().await;

    let results = outcome.map_err(|e| anyhow::anyhow!("Workflow failed: {e}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!();
        println!("  {} Workflow completed ({})", style("*").green().bold(), engine.status());
        let mut keys: Vec<_> = results.keys().collect();
        keys.sort();
        for key in keys {
            println!("  {}: {}", style(key).cyan(), results[key]);
        }
        println!();
    }
    Ok(())
}
