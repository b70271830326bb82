//! In-memory execution repository.
//!
//! Backs the engine's own tests without touching sqlx or a database on disk.
//! Mirrors the SQLite implementation's semantics:
//! upsert keyed by `(execution_id, step_id)`, terminal statuses stamp
//! `completed_at`, totals accumulate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use stepchain_types::error::RepositoryError;
use stepchain_types::execution::{Execution, ExecutionStatus, StepExecution};
use uuid::Uuid;

use super::execution::ExecutionRepository;

/// Thread-safe in-memory implementation of [`ExecutionRepository`].
#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    inner: Arc<RwLock<Store>>,
}

#[derive(Default)]
struct Store {
    executions: HashMap<Uuid, Execution>,
    // Step records per execution, keyed by step_id.
    steps: HashMap<Uuid, HashMap<Uuid, StepExecution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_execution<T>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut Execution) -> T,
    ) -> Result<T, RepositoryError> {
        let mut store = self.inner.write().expect("repository lock poisoned");
        let execution = store.executions.get_mut(id).ok_or(RepositoryError::NotFound)?;
        Ok(f(execution))
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut store = self.inner.write().expect("repository lock poisoned");
        if store.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        store.executions.insert(execution.id, execution.clone());
        store.steps.insert(execution.id, HashMap::new());
        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.with_execution(execution_id, |execution| {
            execution.status = status;
            execution.error = error.map(str::to_string);
            if status.is_terminal() && execution.completed_at.is_none() {
                execution.completed_at = Some(Utc::now());
            }
        })
    }

    async fn set_current_step(
        &self,
        execution_id: &Uuid,
        step_order: u32,
    ) -> Result<(), RepositoryError> {
        self.with_execution(execution_id, |execution| {
            execution.current_step_order = step_order;
        })
    }

    async fn add_usage(
        &self,
        execution_id: &Uuid,
        tokens: u64,
        cost_usd: f64,
    ) -> Result<(), RepositoryError> {
        self.with_execution(execution_id, |execution| {
            execution.total_tokens += tokens;
            execution.total_cost_usd += cost_usd;
        })
    }

    async fn upsert_step_execution(&self, record: &StepExecution) -> Result<(), RepositoryError> {
        let mut store = self.inner.write().expect("repository lock poisoned");
        let steps = store
            .steps
            .get_mut(&record.execution_id)
            .ok_or(RepositoryError::NotFound)?;
        steps.insert(record.step_id, record.clone());
        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<Execution>, RepositoryError> {
        let store = self.inner.read().expect("repository lock poisoned");
        Ok(store.executions.get(execution_id).cloned())
    }

    async fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let store = self.inner.read().expect("repository lock poisoned");
        let mut records: Vec<StepExecution> = store
            .steps
            .get(execution_id)
            .map(|steps| steps.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.step_order);
        Ok(records)
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let store = self.inner.read().expect("repository lock poisoned");
        let mut runs: Vec<Execution> = store
            .executions
            .values()
            .filter(|e| e.workflow_id == *workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }
}
