//! CLI workflow management subcommands.
//!
//! Provides create, list, show, history, and delete operations for workflow
//! definitions, plus the model registry listing.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use uuid::Uuid;

use stepchain_core::engine::cost::format_cost;
use stepchain_core::engine::executor::validate_snapshot;
use stepchain_core::repository::execution::ExecutionRepository;
use stepchain_core::repository::workflow::WorkflowRepository;
use stepchain_types::execution::ExecutionStatus;
use stepchain_types::workflow::WorkflowDefinition;

use crate::state::AppState;

/// Resolve a workflow by UUID or by name.
pub async fn resolve_workflow(state: &AppState, target: &str) -> Result<WorkflowDefinition> {
    let found = if let Ok(id) = target.parse::<Uuid>() {
        state
            .workflow_repo
            .get_definition(&id)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to look up workflow: {e}"))?
    } else {
        state
            .workflow_repo
            .get_definition_by_name(target)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to look up workflow: {e}"))?
    };

    found.ok_or_else(|| anyhow::anyhow!("Workflow '{target}' not found"))
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

pub async fn create_workflow(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let def: WorkflowDefinition = serde_yaml_ng::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse workflow YAML: {e}"))?;

    // Reject definitions the engine would refuse to run
    validate_snapshot(&def, &state.registry)
        .map_err(|e| anyhow::anyhow!("Workflow validation failed: {e}"))?;

    state
        .workflow_repo
        .save_definition(&def)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save workflow: {e}"))?;

    if json {
        let out = serde_json::json!({
            "id": def.id.to_string(),
            "name": def.name,
            "steps": def.steps.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Created workflow '{}'",
            style("*").green().bold(),
            style(&def.name).cyan()
        );
        println!("  ID: {}", def.id);
        println!("  Steps: {}", def.steps.len());
        println!();
        println!(
            "  Run it with: {}",
            style(format!("stepchain run {}", def.name)).dim()
        );
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list_workflows(state: &AppState, json: bool) -> Result<()> {
    let defs = state
        .workflow_repo
        .list_definitions()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list workflows: {e}"))?;

    if json {
        let out: Vec<_> = defs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id.to_string(),
                    "name": d.name,
                    "steps": d.steps.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows registered.");
        println!(
            "  Create one with: {}",
            style("stepchain workflow create <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Name", "Steps", "ID"]);

    for def in &defs {
        table.add_row(vec![
            Cell::new(&def.name).fg(Color::Cyan),
            Cell::new(def.steps.len()),
            Cell::new(def.id),
        ]);
    }

    println!("{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

pub async fn show_workflow(state: &AppState, target: &str, json: bool) -> Result<()> {
    let def = resolve_workflow(state, target).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&def)?);
        return Ok(());
    }

    println!();
    println!("  {} ({})", style(&def.name).cyan().bold(), def.id);
    if let Some(description) = &def.description {
        println!("  {description}");
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "Name", "Model", "Criteria", "Retries", "Context"]);

    for step in def.ordered_steps() {
        table.add_row(vec![
            Cell::new(step.order),
            Cell::new(&step.name),
            Cell::new(&step.model),
            Cell::new(step.criteria.kind()),
            Cell::new(step.max_retries),
            Cell::new(step.context_mode.kind()),
        ]);
    }

    println!("{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

pub async fn workflow_history(state: &AppState, target: &str, limit: u32, json: bool) -> Result<()> {
    let def = resolve_workflow(state, target).await?;
    let runs = state
        .execution_repo
        .list_executions(&def.id, limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list executions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  No executions yet for '{}'.", def.name);
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Execution", "Status", "Step", "Tokens", "Cost", "Started"]);

    for run in &runs {
        table.add_row(vec![
            Cell::new(run.id),
            status_cell(run.status),
            Cell::new(format!("{}/{}", run.current_step_order, run.snapshot.len())),
            Cell::new(run.total_tokens),
            Cell::new(format_cost(run.total_cost_usd)),
            Cell::new(run.started_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!("{table}");
    Ok(())
}

pub(crate) fn status_cell(status: ExecutionStatus) -> Cell {
    let color = match status {
        ExecutionStatus::Pending => Color::Grey,
        ExecutionStatus::Running => Color::Yellow,
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Failed => Color::Red,
    };
    Cell::new(status).fg(color)
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

pub async fn delete_workflow(state: &AppState, target: &str, json: bool) -> Result<()> {
    let def = resolve_workflow(state, target).await?;

    state
        .workflow_repo
        .delete_definition(&def.id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to delete workflow: {e}"))?;

    if json {
        println!(
            "{}",
            serde_json::json!({"deleted": true, "id": def.id.to_string()})
        );
    } else {
        println!();
        println!(
            "  {} Deleted workflow '{}'",
            style("*").green().bold(),
            style(&def.name).cyan()
        );
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

pub fn list_models(state: &AppState, json: bool) -> Result<()> {
    let ids = state.registry.model_ids();

    if json {
        let out: Vec<_> = ids
            .iter()
            .filter_map(|id| state.registry.get(id))
            .map(|m| serde_json::to_value(m).unwrap_or_default())
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Model",
            "Prompt $/1M",
            "Completion $/1M",
            "Context limit",
        ]);

    for id in ids {
        if let Some(entry) = state.registry.get(id) {
            table.add_row(vec![
                Cell::new(&entry.id).fg(Color::Cyan),
                Cell::new(format!("{:.2}", entry.prompt_cost_per_million)),
                Cell::new(format!("{:.2}", entry.completion_cost_per_million)),
                Cell::new(
                    entry
                        .context_limit
                        .map_or("-".to_string(), |l| l.to_string()),
                ),
            ]);
        }
    }

    println!("{table}");
    Ok(())
}
