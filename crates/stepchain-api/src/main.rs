//! Stepchain CLI and REST API entry point.
//!
//! Binary name: `stepchain`
//!
//! Parses CLI arguments, initializes the database and engine, then dispatches
//! to the appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, WorkflowCommands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need app state or logging
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepchain", &mut std::io::stdout());
        return Ok(());
    }

    // Set up tracing based on verbosity; `serve --otel` swaps in the full
    // OpenTelemetry pipeline instead
    let otel = matches!(&cli.command, Commands::Serve { otel: true, .. });
    if otel {
        stepchain_observe::tracing_setup::init_tracing(true)
            .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    } else {
        let filter = match cli.verbose {
            0 if cli.quiet => "error",
            0 => "warn",
            1 => "info,stepchain=debug",
            _ => "trace",
        };
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_target(false)
            .init();
    }

    // Initialize application state (DB, config, engine)
    let state = AppState::init().await?;

    let result = match cli.command {
        Commands::Serve { host, port, .. } => http::router::serve(state, &host, port).await,

        Commands::Workflow { command } => match command {
            WorkflowCommands::Create { file } => {
                cli::workflow::create_workflow(&state, &file, cli.json).await
            }
            WorkflowCommands::List => cli::workflow::list_workflows(&state, cli.json).await,
            WorkflowCommands::Show { workflow } => {
                cli::workflow::show_workflow(&state, &workflow, cli.json).await
            }
            WorkflowCommands::History { workflow, limit } => {
                cli::workflow::workflow_history(&state, &workflow, limit, cli.json).await
            }
            WorkflowCommands::Delete { workflow } => {
                cli::workflow::delete_workflow(&state, &workflow, cli.json).await
            }
        },

        Commands::Run { workflow, watch } => {
            cli::run::run_workflow(&state, &workflow, watch, cli.json).await
        }

        Commands::Status { execution_id } => {
            cli::run::show_status(&state, &execution_id, cli.json).await
        }

        Commands::Models => cli::workflow::list_models(&state, cli.json),

        Commands::Completions { .. } => unreachable!("handled before state init"),
    };

    if otel {
        stepchain_observe::tracing_setup::shutdown_tracing();
    }

    result
}
