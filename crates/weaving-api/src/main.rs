//! Weaving Flow command-line entry point.
//!
//! Binary name: `weave`
//!
//! Parses CLI arguments, sets up tracing, loads `config.toml` from the data
//! directory and dispatches to the command handlers.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands, params_map};
use state::AppState;
use weaving_infra::config::{load_config, resolve_data_dir};
use weaving_observe::tracing_setup::{filter_for_verbosity, init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.otel, filter_for_verbosity(cli.verbose)) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need configuration or a database
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "weave", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    let config = load_config(&data_dir).await;
    tracing::debug!(data_dir = %data_dir.display(), "configuration loaded");

    match cli.command {
        Commands::Validate { file } => cli::workflow::handle_validate(&file, cli.json).await,

        Commands::Exec { file, params } => {
            cli::exec::handle_exec(&config, &file, params_map(params), cli.json).await
        }

        Commands::Import { workflow_id, file } => {
            let state = AppState::init(data_dir, config).await?;
            cli::workflow::handle_import(&state, &workflow_id, &file, cli.json).await
        }

        Commands::Run {
            workflow_id,
            params,
            detach,
        } => {
            let state = AppState::init(data_dir, config).await?;
            let result =
                cli::workflow::handle_run(&state, &workflow_id, params_map(params), detach, cli.json).await;
            state.supervisor.shutdown(state.shutdown_grace()).await;
            result
        }

        Commands::Status { instance_id } => {
            let state = AppState::init(data_dir, config).await?;
            cli::workflow::handle_status(&state, &instance_id, cli.json).await
        }

        Commands::Recover => {
            let state = AppState::init(data_dir, config).await?;
            cli::workflow::handle_recover(&state, cli.json).await
        }

        Commands::Completions { .. } => Ok(()),
    }
}
