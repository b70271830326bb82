//! Execution repository trait definition.
//!
//! Storage interface for execution and step-execution records. The engine is
//! the only writer for a given execution; the polling observer reads the same
//! store independently and never talks to the engine.

use stepchain_types::error::RepositoryError;
use stepchain_types::execution::{Execution, ExecutionStatus, StepExecution};
use uuid::Uuid;

/// Repository trait for execution state persistence.
///
/// Writes come exclusively from the execution's own background task, so the
/// implementation only needs atomic persistence of each update -- no
/// cross-task locking.
pub trait ExecutionRepository: Send + Sync {
    /// Create a new execution record (status `pending`).
    fn create_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update an execution's status. `error` is persisted alongside; a
    /// terminal status also stamps `completed_at`.
    fn update_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Advance `current_step_order` for an execution.
    fn set_current_step(
        &self,
        execution_id: &Uuid,
        step_order: u32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Add one attempt's token/cost usage to the execution totals.
    fn add_usage(
        &self,
        execution_id: &Uuid,
        tokens: u64,
        cost_usd: f64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert or replace the step-execution record for its step.
    ///
    /// Keyed by `(execution_id, step_id)`: one record per step, superseded
    /// on every attempt transition.
    fn upsert_step_execution(
        &self,
        record: &StepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution by its UUID.
    fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// List step-execution records for a run, ordered by `step_order` ASC.
    fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepExecution>, RepositoryError>> + Send;

    /// List executions for a workflow, ordered by `started_at` DESC.
    fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;
}
