//! CLI execution commands: launch a run, watch it, inspect one.
//!
//! `--watch` is the reference polling observer: it reads the execution store
//! every 2 seconds and stops once the status turns terminal. It never talks
//! to the engine directly.

use std::time::Duration;

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use stepchain_core::engine::cost::format_cost;
use stepchain_core::repository::execution::ExecutionRepository;
use stepchain_types::execution::{Execution, ExecutionStatus, StepExecution, StepExecutionStatus};

use crate::cli::workflow::resolve_workflow;
use crate::state::AppState;

/// Fixed polling cadence for `--watch`.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run_workflow(state: &AppState, target: &str, watch: bool, json: bool) -> Result<()> {
    let def = resolve_workflow(state, target).await?;

    let handle = state
        .executor
        .spawn(&def)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to launch execution: {e}"))?;

    if !watch {
        if json {
            let out = serde_json::json!({
                "execution_id": handle.execution_id.to_string(),
                "workflow_name": def.name,
                "status": "pending",
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            println!();
            println!(
                "  {} Launched '{}'",
                style("*").green().bold(),
                style(&def.name).cyan()
            );
            println!("  Execution ID: {}", handle.execution_id);
            println!();
            println!(
                "  Check progress: {}",
                style(format!("stepchain status {}", handle.execution_id)).dim()
            );
            println!();
        }
        return Ok(());
    }

    watch_execution(state, handle.execution_id, json).await
}

/// Poll the execution store until the run reaches a terminal status.
async fn watch_execution(state: &AppState, execution_id: Uuid, json: bool) -> Result<()> {
    let spinner = if json {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("  {spinner} {msg}")
                .expect("spinner template is valid"),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    };

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let execution = loop {
        interval.tick().await;

        let Some(execution) = state
            .execution_repo
            .get_execution(&execution_id)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read execution: {e}"))?
        else {
            anyhow::bail!("Execution {execution_id} not found");
        };

        if let Some(pb) = &spinner {
            pb.set_message(format!(
                "{} -- step {}/{} ({} tokens, {})",
                execution.status,
                execution.current_step_order,
                execution.snapshot.len(),
                execution.total_tokens,
                format_cost(execution.total_cost_usd),
            ));
        }

        if execution.status.is_terminal() {
            break execution;
        }
    };

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let steps = state
        .execution_repo
        .list_step_executions(&execution_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read step records: {e}"))?;

    render_execution(&execution, &steps, json)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn show_status(state: &AppState, execution_id: &str, json: bool) -> Result<()> {
    let id: Uuid = execution_id
        .parse()
        .map_err(|_| anyhow::anyhow!("'{execution_id}' is not a valid execution UUID"))?;

    let Some(execution) = state
        .execution_repo
        .get_execution(&id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read execution: {e}"))?
    else {
        anyhow::bail!("Execution {id} not found");
    };

    let steps = state
        .execution_repo
        .list_step_executions(&id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read step records: {e}"))?;

    render_execution(&execution, &steps, json)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_execution(execution: &Execution, steps: &[StepExecution], json: bool) -> Result<()> {
    if json {
        let mut out = serde_json::to_value(execution)?;
        out["steps"] = serde_json::to_value(steps)?;
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} ({})",
        style(&execution.workflow_name).cyan().bold(),
        execution.id
    );

    let status_styled = match execution.status {
        ExecutionStatus::Completed => style(execution.status.to_string()).green(),
        ExecutionStatus::Failed => style(execution.status.to_string()).red(),
        ExecutionStatus::Running => style(execution.status.to_string()).yellow(),
        ExecutionStatus::Pending => style(execution.status.to_string()).dim(),
    };
    println!(
        "  Status: {}  Tokens: {}  Cost: {}",
        status_styled,
        execution.total_tokens,
        format_cost(execution.total_cost_usd)
    );
    if let Some(error) = &execution.error {
        println!("  {} {}", style("Error:").red().bold(), error);
    }
    println!();

    if steps.is_empty() {
        println!("  No steps attempted yet.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "#", "Step", "Status", "Attempt", "Criteria", "Tokens", "Cost",
        ]);

    for record in steps {
        let status_color = match record.status {
            StepExecutionStatus::Completed => Color::Green,
            StepExecutionStatus::Failed => Color::Red,
            StepExecutionStatus::Running | StepExecutionStatus::Retrying => Color::Yellow,
            StepExecutionStatus::Pending => Color::Grey,
        };
        let criteria = match record.criteria_passed {
            Some(true) => "pass",
            Some(false) => "fail",
            None => "-",
        };
        table.add_row(vec![
            Cell::new(record.step_order),
            Cell::new(&record.step_name),
            Cell::new(record.status).fg(status_color),
            Cell::new(record.attempt),
            Cell::new(criteria),
            Cell::new(record.total_tokens),
            Cell::new(format_cost(record.cost_usd)),
        ]);
    }

    println!("{table}");

    // Surface the failing step's detail under the table
    for record in steps {
        if record.status == StepExecutionStatus::Failed {
            if let Some(error) = &record.error {
                println!(
                    "  {} step {}: {}",
                    style("Failed").red().bold(),
                    record.step_order,
                    error
                );
            }
            if let Some(detail) = &record.criteria_detail {
                println!("  {} {}", style("Criteria:").dim(), detail);
            }
        }
    }
    println!();

    Ok(())
}
