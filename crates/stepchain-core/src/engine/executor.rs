//! Pipeline executor: sequential, fail-fast execution of a workflow snapshot.
//!
//! `PipelineExecutor` owns one background tokio task per execution. Steps run
//! strictly in order -- each step's input is the previous step's output, so
//! there is nothing to gain from running downstream steps after an upstream
//! failure. Every state transition is checkpointed, and the task never lets a
//! fault escape: all failure paths end in a persisted `failed` status.
//!
//! # Execution flow
//!
//! 1. Validate the snapshot (configuration errors reject the run request).
//! 2. Create the `Execution` record in `pending` and return a handle.
//! 3. In the background: transition to `running`, walk the steps in order,
//!    delegating each to the [`StepRunner`], threading context forward.
//! 4. Stop on the first step that exhausts its attempts; otherwise complete.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use stepchain_types::config::ModelRegistry;
use stepchain_types::execution::{Execution, ExecutionStatus};
use stepchain_types::workflow::{Criteria, WorkflowDefinition};
use uuid::Uuid;

use crate::llm::ModelInvoker;
use crate::repository::execution::ExecutionRepository;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::retry::BackoffPolicy;
use super::step_runner::StepRunner;

// ---------------------------------------------------------------------------
// ExecutionHandle
// ---------------------------------------------------------------------------

/// Returned by a run request. The caller polls the execution store for
/// status; the handle never exposes the background task itself.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionHandle {
    pub execution_id: Uuid,
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors surfaced by the executor's public API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The workflow snapshot cannot be run as configured.
    #[error("invalid workflow snapshot: {0}")]
    InvalidSnapshot(String),

    /// Persisting execution state failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

// ---------------------------------------------------------------------------
// Snapshot validation
// ---------------------------------------------------------------------------

/// Validate a workflow snapshot before any record is written.
///
/// Static misconfiguration is rejected at the run request rather than
/// surfacing as a mid-run step failure.
pub fn validate_snapshot(
    workflow: &WorkflowDefinition,
    registry: &ModelRegistry,
) -> Result<(), EngineError> {
    if workflow.steps.is_empty() {
        return Err(EngineError::InvalidSnapshot(
            "workflow has no steps".to_string(),
        ));
    }

    let mut seen_orders = HashSet::new();
    for step in &workflow.steps {
        if !seen_orders.insert(step.order) {
            return Err(EngineError::InvalidSnapshot(format!(
                "duplicate step order {}",
                step.order
            )));
        }
        if step.prompt.trim().is_empty() {
            return Err(EngineError::InvalidSnapshot(format!(
                "step '{}' has an empty prompt",
                step.name
            )));
        }
        if !registry.contains(&step.model) {
            return Err(EngineError::InvalidSnapshot(format!(
                "step '{}' uses unknown model '{}'",
                step.name, step.model
            )));
        }
        match &step.criteria {
            Criteria::Regex { pattern } => {
                Regex::new(pattern).map_err(|e| {
                    EngineError::InvalidSnapshot(format!(
                        "step '{}' has invalid regex pattern: {e}",
                        step.name
                    ))
                })?;
            }
            Criteria::Contains { value } if value.is_empty() => {
                return Err(EngineError::InvalidSnapshot(format!(
                    "step '{}' has an empty contains value",
                    step.name
                )));
            }
            Criteria::LlmJudge { rubric } if rubric.trim().is_empty() => {
                return Err(EngineError::InvalidSnapshot(format!(
                    "step '{}' has an empty judge rubric",
                    step.name
                )));
            }
            _ => {}
        }
    }

    // Orders must be dense starting at 1
    for expected in 1..=workflow.steps.len() as u32 {
        if !seen_orders.contains(&expected) {
            return Err(EngineError::InvalidSnapshot(format!(
                "step orders must be dense starting at 1, missing order {expected}"
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

/// Sequential pipeline executor.
///
/// Generic over the execution store and the model gateway. Cloning is cheap;
/// clones share the same checkpoint manager and step runner.
pub struct PipelineExecutor<R: ExecutionRepository, M: ModelInvoker> {
    checkpoint: Arc<CheckpointManager<R>>,
    runner: Arc<StepRunner<M>>,
    registry: Arc<ModelRegistry>,
}

impl<R: ExecutionRepository, M: ModelInvoker> Clone for PipelineExecutor<R, M> {
    fn clone(&self) -> Self {
        Self {
            checkpoint: Arc::clone(&self.checkpoint),
            runner: Arc::clone(&self.runner),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R, M> PipelineExecutor<R, M>
where
    R: ExecutionRepository + 'static,
    M: ModelInvoker + 'static,
{
    pub fn new(
        repo: R,
        invoker: Arc<M>,
        registry: Arc<ModelRegistry>,
        backoff: BackoffPolicy,
        max_output_tokens: u32,
    ) -> Self {
        let runner = StepRunner::new(
            Arc::clone(&invoker),
            Arc::clone(&registry),
            backoff,
            max_output_tokens,
        );
        Self {
            checkpoint: Arc::new(CheckpointManager::new(repo)),
            runner: Arc::new(runner),
            registry,
        }
    }

    /// Access the checkpoint manager (used by tests and status tooling).
    pub fn checkpoint(&self) -> &CheckpointManager<R> {
        &self.checkpoint
    }

    /// Launch a run: create the pending record, start the background task,
    /// and return immediately.
    pub async fn spawn(&self, workflow: &WorkflowDefinition) -> Result<ExecutionHandle, EngineError> {
        validate_snapshot(workflow, &self.registry)?;

        let mut snapshot = workflow.steps.clone();
        snapshot.sort_by_key(|s| s.order);

        let execution = Execution::new(workflow.id, workflow.name.clone(), snapshot);
        let execution_id = execution.id;
        self.checkpoint.create_execution(&execution).await?;

        tracing::info!(
            execution_id = %execution_id,
            workflow = workflow.name.as_str(),
            steps = execution.snapshot.len(),
            "execution queued"
        );

        let this = self.clone();
        tokio::spawn(async move {
            this.execute(execution).await;
        });

        Ok(ExecutionHandle { execution_id })
    }

    /// Run an execution to its terminal status.
    ///
    /// Public for callers that want to run inline (tests, one-shot CLI runs);
    /// [`spawn`](Self::spawn) wraps this in a background task. Never unwinds:
    /// a persistence failure is logged and, where possible, recorded as a
    /// failed run.
    pub async fn execute(&self, execution: Execution) {
        let execution_id = execution.id;
        if let Err(e) = self.run_steps(&execution).await {
            tracing::error!(
                execution_id = %execution_id,
                error = %e,
                "execution aborted by persistence failure"
            );
            let _ = self
                .checkpoint
                .checkpoint_execution_status(
                    execution_id,
                    ExecutionStatus::Failed,
                    Some(&format!("internal error: {e}")),
                )
                .await;
        }
    }

    async fn run_steps(&self, execution: &Execution) -> Result<(), CheckpointError> {
        let execution_id = execution.id;

        self.checkpoint
            .checkpoint_execution_status(execution_id, ExecutionStatus::Running, None)
            .await?;

        tracing::info!(
            execution_id = %execution_id,
            workflow = execution.workflow_name.as_str(),
            "starting execution"
        );

        // Snapshot is stored sorted; input context is empty for step 1
        let mut context = String::new();

        for step in &execution.snapshot {
            self.checkpoint
                .checkpoint_current_step(execution_id, step.order)
                .await?;

            let outcome = self
                .runner
                .run(&self.checkpoint, execution_id, step, &context)
                .await?;

            if !outcome.success {
                let step_error = outcome
                    .record
                    .error
                    .unwrap_or_else(|| "step failed".to_string());
                let message = format!("Step '{}' failed: {step_error}", step.name);

                self.checkpoint
                    .checkpoint_execution_status(
                        execution_id,
                        ExecutionStatus::Failed,
                        Some(&message),
                    )
                    .await?;

                tracing::warn!(
                    execution_id = %execution_id,
                    step_order = step.order,
                    "execution failed"
                );
                return Ok(());
            }

            context = outcome.record.output_context.unwrap_or_default();
        }

        self.checkpoint
            .checkpoint_execution_status(execution_id, ExecutionStatus::Completed, None)
            .await?;

        tracing::info!(execution_id = %execution_id, "execution completed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
