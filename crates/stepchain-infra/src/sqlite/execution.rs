//! SQLite execution repository implementation.
//!
//! Implements `ExecutionRepository` from `stepchain-core` using sqlx with
//! split read/write pools. Execution rows carry the workflow snapshot as a
//! JSON blob; step rows are upserted in place per attempt, keyed by
//! `(execution_id, step_id)`.

use chrono::{DateTime, Utc};
use sqlx::Row;
use stepchain_core::repository::execution::ExecutionRepository;
use stepchain_types::error::RepositoryError;
use stepchain_types::execution::{Execution, ExecutionStatus, StepExecution, StepExecutionStatus};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionRepository`.
#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    workflow_id: String,
    workflow_name: String,
    snapshot: String,
    status: String,
    current_step_order: i64,
    started_at: String,
    completed_at: Option<String>,
    error: Option<String>,
    total_cost_usd: f64,
    total_tokens: i64,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_name: row.try_get("workflow_name")?,
            snapshot: row.try_get("snapshot")?,
            status: row.try_get("status")?,
            current_step_order: row.try_get("current_step_order")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error: row.try_get("error")?,
            total_cost_usd: row.try_get("total_cost_usd")?,
            total_tokens: row.try_get("total_tokens")?,
        })
    }

    fn into_execution(self) -> Result<Execution, RepositoryError> {
        let status: ExecutionStatus = self
            .status
            .parse()
            .map_err(RepositoryError::Query)?;
        let snapshot = serde_json::from_str(&self.snapshot)
            .map_err(|e| RepositoryError::Query(format!("invalid snapshot JSON: {e}")))?;

        Ok(Execution {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            workflow_name: self.workflow_name,
            snapshot,
            status,
            current_step_order: self.current_step_order as u32,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            error: self.error,
            total_cost_usd: self.total_cost_usd,
            total_tokens: self.total_tokens as u64,
        })
    }
}

struct StepExecutionRow {
    id: String,
    execution_id: String,
    step_id: String,
    step_order: i64,
    step_name: String,
    status: String,
    attempt: i64,
    input_context: String,
    prompt_sent: String,
    response: Option<String>,
    criteria_passed: Option<i64>,
    criteria_detail: Option<String>,
    output_context: Option<String>,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    cost_usd: f64,
    error: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl StepExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            step_id: row.try_get("step_id")?,
            step_order: row.try_get("step_order")?,
            step_name: row.try_get("step_name")?,
            status: row.try_get("status")?,
            attempt: row.try_get("attempt")?,
            input_context: row.try_get("input_context")?,
            prompt_sent: row.try_get("prompt_sent")?,
            response: row.try_get("response")?,
            criteria_passed: row.try_get("criteria_passed")?,
            criteria_detail: row.try_get("criteria_detail")?,
            output_context: row.try_get("output_context")?,
            prompt_tokens: row.try_get("prompt_tokens")?,
            completion_tokens: row.try_get("completion_tokens")?,
            total_tokens: row.try_get("total_tokens")?,
            cost_usd: row.try_get("cost_usd")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_step_execution(self) -> Result<StepExecution, RepositoryError> {
        let status: StepExecutionStatus = self
            .status
            .parse()
            .map_err(RepositoryError::Query)?;

        Ok(StepExecution {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            step_id: parse_uuid(&self.step_id)?,
            step_order: self.step_order as u32,
            step_name: self.step_name,
            status,
            attempt: self.attempt as u32,
            input_context: self.input_context,
            prompt_sent: self.prompt_sent,
            response: self.response,
            criteria_passed: self.criteria_passed.map(|v| v != 0),
            criteria_detail: self.criteria_detail,
            output_context: self.output_context,
            prompt_tokens: self.prompt_tokens as u32,
            completion_tokens: self.completion_tokens as u32,
            total_tokens: self.total_tokens as u32,
            cost_usd: self.cost_usd,
            error: self.error,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let snapshot_json = serde_json::to_string(&execution.snapshot)
            .map_err(|e| RepositoryError::Query(format!("serialize snapshot: {e}")))?;

        sqlx::query(
            r#"INSERT INTO executions
               (id, workflow_id, workflow_name, snapshot, status, current_step_order,
                started_at, completed_at, error, total_cost_usd, total_tokens)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(&execution.workflow_name)
        .bind(&snapshot_json)
        .bind(execution.status.to_string())
        .bind(execution.current_step_order as i64)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.error)
        .bind(execution.total_cost_usd)
        .bind(execution.total_tokens as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("execution {} already exists", execution.id))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let completed_at = status
            .is_terminal()
            .then(|| format_datetime(&Utc::now()));

        let result = sqlx::query(
            "UPDATE executions SET status = ?, error = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(error)
        .bind(&completed_at)
        .bind(execution_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn set_current_step(
        &self,
        execution_id: &Uuid,
        step_order: u32,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE executions SET current_step_order = ? WHERE id = ?")
            .bind(step_order as i64)
            .bind(execution_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn add_usage(
        &self,
        execution_id: &Uuid,
        tokens: u64,
        cost_usd: f64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE executions SET total_tokens = total_tokens + ?, total_cost_usd = total_cost_usd + ? WHERE id = ?",
        )
        .bind(tokens as i64)
        .bind(cost_usd)
        .bind(execution_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn upsert_step_execution(&self, record: &StepExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO step_executions
               (id, execution_id, step_id, step_order, step_name, status, attempt,
                input_context, prompt_sent, response, criteria_passed, criteria_detail,
                output_context, prompt_tokens, completion_tokens, total_tokens, cost_usd,
                error, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id, step_id) DO UPDATE SET
                 status = excluded.status,
                 attempt = excluded.attempt,
                 input_context = excluded.input_context,
                 prompt_sent = excluded.prompt_sent,
                 response = excluded.response,
                 criteria_passed = excluded.criteria_passed,
                 criteria_detail = excluded.criteria_detail,
                 output_context = excluded.output_context,
                 prompt_tokens = excluded.prompt_tokens,
                 completion_tokens = excluded.completion_tokens,
                 total_tokens = excluded.total_tokens,
                 cost_usd = excluded.cost_usd,
                 error = excluded.error,
                 started_at = excluded.started_at,
                 completed_at = excluded.completed_at"#,
        )
        .bind(record.id.to_string())
        .bind(record.execution_id.to_string())
        .bind(record.step_id.to_string())
        .bind(record.step_order as i64)
        .bind(&record.step_name)
        .bind(record.status.to_string())
        .bind(record.attempt as i64)
        .bind(&record.input_context)
        .bind(&record.prompt_sent)
        .bind(&record.response)
        .bind(record.criteria_passed.map(i64::from))
        .bind(&record.criteria_detail)
        .bind(&record.output_context)
        .bind(record.prompt_tokens as i64)
        .bind(record.completion_tokens as i64)
        .bind(record.total_tokens as i64)
        .bind(record.cost_usd)
        .bind(&record.error)
        .bind(record.started_at.as_ref().map(format_datetime))
        .bind(record.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM step_executions WHERE execution_id = ? ORDER BY step_order ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepExecutionRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            records.push(r.into_step_execution()?);
        }
        Ok(records)
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM executions WHERE workflow_id = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExecutionRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            runs.push(r.into_execution()?);
        }
        Ok(runs)
    }
}
