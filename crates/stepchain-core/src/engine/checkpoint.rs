//! Durable checkpoints for execution state.
//!
//! Wraps [`ExecutionRepository`] with a higher-level API for recording state
//! transitions. Every transition is persisted before the engine moves
//! forward, so the polling observer always reads the latest true state --
//! including partial progress of an in-flight run.

use stepchain_types::execution::{Execution, ExecutionStatus, StepExecution};
use uuid::Uuid;

use crate::repository::execution::ExecutionRepository;

/// Manages durable state checkpoints for executions.
///
/// Generic over `R: ExecutionRepository` so it works with any storage backend
/// (SQLite, in-memory).
pub struct CheckpointManager<R: ExecutionRepository> {
    repo: R,
}

impl<R: ExecutionRepository> CheckpointManager<R> {
    /// Create a new checkpoint manager backed by the given repository.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Persist a freshly created execution (status `pending`).
    pub async fn create_execution(&self, execution: &Execution) -> Result<(), CheckpointError> {
        self.repo
            .create_execution(execution)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Record an execution status transition.
    pub async fn checkpoint_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), CheckpointError> {
        self.repo
            .update_execution_status(&execution_id, status, error)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution_id,
            status = %status,
            "checkpointed execution status"
        );
        Ok(())
    }

    /// Record that the run has advanced to a step.
    pub async fn checkpoint_current_step(
        &self,
        execution_id: Uuid,
        step_order: u32,
    ) -> Result<(), CheckpointError> {
        self.repo
            .set_current_step(&execution_id, step_order)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Persist the current shape of a step record.
    ///
    /// Called on every attempt transition: start, model result, retrying,
    /// completed, failed. The record supersedes the step's previous state.
    pub async fn checkpoint_step(&self, record: &StepExecution) -> Result<(), CheckpointError> {
        self.repo
            .upsert_step_execution(record)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %record.execution_id,
            step_order = record.step_order,
            attempt = record.attempt,
            status = %record.status,
            "checkpointed step"
        );
        Ok(())
    }

    /// Add one attempt's usage to the execution totals.
    ///
    /// Every attempt counts, pass or fail -- the model call happened either
    /// way.
    pub async fn accumulate_usage(
        &self,
        execution_id: Uuid,
        tokens: u64,
        cost_usd: f64,
    ) -> Result<(), CheckpointError> {
        self.repo
            .add_usage(&execution_id, tokens, cost_usd)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }
}

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryExecutionRepository;
    use stepchain_types::workflow::{ContextMode, Criteria, StepDefinition};

    fn sample_step() -> StepDefinition {
        StepDefinition {
            id: Uuid::now_v7(),
            order: 1,
            name: "gen".to_string(),
            model: "kimi-k2p5".to_string(),
            prompt: "hi".to_string(),
            criteria: Criteria::AlwaysPass,
            max_retries: 0,
            context_mode: ContextMode::Full,
        }
    }

    #[tokio::test]
    async fn checkpoints_flow_through_to_repository() {
        let repo = InMemoryExecutionRepository::new();
        let checkpoint = CheckpointManager::new(repo.clone());

        let step = sample_step();
        let execution = Execution::new(Uuid::now_v7(), "demo".to_string(), vec![step.clone()]);
        checkpoint.create_execution(&execution).await.unwrap();

        checkpoint
            .checkpoint_execution_status(execution.id, ExecutionStatus::Running, None)
            .await
            .unwrap();
        checkpoint
            .checkpoint_current_step(execution.id, 1)
            .await
            .unwrap();

        let mut record = StepExecution::new(execution.id, &step);
        record.attempt = 1;
        checkpoint.checkpoint_step(&record).await.unwrap();
        checkpoint
            .accumulate_usage(execution.id, 42, 0.001)
            .await
            .unwrap();

        let stored = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Running);
        assert_eq!(stored.current_step_order, 1);
        assert_eq!(stored.total_tokens, 42);
        assert_eq!(repo.list_step_executions(&execution.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_unknown_execution_surfaces_error() {
        let checkpoint = CheckpointManager::new(InMemoryExecutionRepository::new());
        let err = checkpoint
            .checkpoint_execution_status(Uuid::now_v7(), ExecutionStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Repository(_)));
    }
}
