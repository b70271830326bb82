//! CLI command definitions and dispatch for the `stepchain` binary.
//!
//! Uses clap derive macros for argument parsing. The CLI follows a noun-verb
//! pattern (e.g., `stepchain workflow create`, `stepchain run <name>`).

pub mod run;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Define and run linear LLM pipelines.
#[derive(Parser)]
#[command(name = "stepchain", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind.
        #[arg(long, default_value_t = 8321)]
        port: u16,

        /// Export spans via OpenTelemetry (stdout exporter).
        #[arg(long)]
        otel: bool,
    },

    /// Manage workflow definitions.
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// Launch an execution of a workflow.
    Run {
        /// Workflow name or UUID.
        workflow: String,

        /// Poll the execution every 2 seconds until it finishes.
        #[arg(long)]
        watch: bool,
    },

    /// Show the status of an execution, with per-step detail.
    Status {
        /// Execution UUID.
        execution_id: String,
    },

    /// List the models in the registry with their rates.
    Models,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Workflow management subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// Register a workflow from a YAML file.
    Create {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// List registered workflows.
    #[command(alias = "ls")]
    List,

    /// Show a workflow definition.
    Show {
        /// Workflow name or UUID.
        workflow: String,
    },

    /// Show recent executions of a workflow.
    History {
        /// Workflow name or UUID.
        workflow: String,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Delete a registered workflow.
    #[command(alias = "rm")]
    Delete {
        /// Workflow name or UUID.
        workflow: String,
    },
}
