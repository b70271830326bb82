//! Execution tracking types for Stepchain.
//!
//! An [`Execution`] is one run of a workflow snapshot; a [`StepExecution`] is
//! the attempt-bearing record of a single step within it. Both are persisted
//! on every transition so a polling observer always sees live state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::StepDefinition;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of an execution.
///
/// Transitions are monotonic: `Pending -> Running -> {Completed | Failed}`.
/// Terminal statuses are final; no step records are created afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Whether this status ends the execution's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// Status of an individual step within an execution.
///
/// `Retrying` marks the window between a failed attempt and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
}

impl fmt::Display for StepExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepExecutionStatus::Pending => write!(f, "pending"),
            StepExecutionStatus::Running => write!(f, "running"),
            StepExecutionStatus::Retrying => write!(f, "retrying"),
            StepExecutionStatus::Completed => write!(f, "completed"),
            StepExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for StepExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepExecutionStatus::Pending),
            "running" => Ok(StepExecutionStatus::Running),
            "retrying" => Ok(StepExecutionStatus::Retrying),
            "completed" => Ok(StepExecutionStatus::Completed),
            "failed" => Ok(StepExecutionStatus::Failed),
            other => Err(format!("invalid step execution status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One run of a workflow.
///
/// Carries its own frozen copy of the step definitions (`snapshot`), so the
/// run is immune to workflow edits made after launch. Totals are the sum over
/// all step attempts, including failed ones -- cost is incurred whenever the
/// model call actually happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    /// ID of the workflow this run was launched from.
    pub workflow_id: Uuid,
    /// Workflow name (denormalized for display).
    pub workflow_name: String,
    /// Frozen step definitions, taken at launch time.
    pub snapshot: Vec<StepDefinition>,
    /// Current run status.
    pub status: ExecutionStatus,
    /// Order of the step currently being attempted (or last attempted).
    /// Never decreases. 0 until the first step begins.
    pub current_step_order: u32,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message, set only when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Total spend across all attempts of all steps, in USD.
    pub total_cost_usd: f64,
    /// Total tokens across all attempts of all steps.
    pub total_tokens: u64,
}

impl Execution {
    /// Create a new pending execution from a workflow snapshot.
    pub fn new(workflow_id: Uuid, workflow_name: String, snapshot: Vec<StepDefinition>) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            workflow_name,
            snapshot,
            status: ExecutionStatus::Pending,
            current_step_order: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            total_cost_usd: 0.0,
            total_tokens: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// StepExecution
// ---------------------------------------------------------------------------

/// The attempt-bearing record of a step within an execution.
///
/// One record exists per step; each retry supersedes the transient fields of
/// the previous attempt while `attempt` increases monotonically and is never
/// reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// UUIDv7 record ID.
    pub id: Uuid,
    /// Parent execution ID.
    pub execution_id: Uuid,
    /// ID of the originating step definition.
    pub step_id: Uuid,
    /// Order of the step within the snapshot.
    pub step_order: u32,
    /// Step name (denormalized for display).
    pub step_name: String,
    /// Current step status.
    pub status: StepExecutionStatus,
    /// Attempt number. Starts at 1, increments per retry.
    pub attempt: u32,
    /// Context received from the previous step. Empty for step 1.
    pub input_context: String,
    /// Fully assembled prompt actually sent to the model.
    pub prompt_sent: String,
    /// Raw model output of the latest attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Whether the criteria passed, set after evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_passed: Option<bool>,
    /// Human-readable explanation of the criteria verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_detail: Option<String>,
    /// Context computed for the next step, set on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_context: Option<String>,
    /// Prompt tokens of the latest attempt.
    pub prompt_tokens: u32,
    /// Completion tokens of the latest attempt.
    pub completion_tokens: u32,
    /// Total tokens of the latest attempt.
    pub total_tokens: u32,
    /// Cost of the latest attempt, in USD.
    pub cost_usd: f64,
    /// Error message of the latest failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the latest attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    /// Create a fresh pending record for a step.
    pub fn new(execution_id: Uuid, step: &StepDefinition) -> Self {
        Self {
            id: Uuid::now_v7(),
            execution_id,
            step_id: step.id,
            step_order: step.order,
            step_name: step.name.clone(),
            status: StepExecutionStatus::Pending,
            attempt: 0,
            input_context: String::new(),
            prompt_sent: String::new(),
            response: None,
            criteria_passed: None,
            criteria_detail: None,
            output_context: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            cost_usd: 0.0,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ContextMode, Criteria};

    fn sample_step() -> StepDefinition {
        StepDefinition {
            id: Uuid::now_v7(),
            order: 1,
            name: "Generate".to_string(),
            model: "kimi-k2p5".to_string(),
            prompt: "Say hello".to_string(),
            criteria: Criteria::AlwaysPass,
            max_retries: 0,
            context_mode: ContextMode::Full,
        }
    }

    #[test]
    fn execution_status_roundtrip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
        ] {
            let s = status.to_string();
            let parsed: ExecutionStatus = s.parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn execution_status_terminal() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
    }

    #[test]
    fn step_status_roundtrip() {
        for status in [
            StepExecutionStatus::Pending,
            StepExecutionStatus::Running,
            StepExecutionStatus::Retrying,
            StepExecutionStatus::Completed,
            StepExecutionStatus::Failed,
        ] {
            let s = status.to_string();
            let parsed: StepExecutionStatus = s.parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn status_serde_snake_case() {
        let json = serde_json::to_string(&ExecutionStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let json = serde_json::to_string(&StepExecutionStatus::Retrying).unwrap();
        assert_eq!(json, "\"retrying\"");
    }

    #[test]
    fn new_execution_starts_pending_with_zero_totals() {
        let step = sample_step();
        let exec = Execution::new(Uuid::now_v7(), "demo".to_string(), vec![step]);
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.current_step_order, 0);
        assert_eq!(exec.total_tokens, 0);
        assert!(exec.error.is_none());
        assert!(exec.completed_at.is_none());
    }

    #[test]
    fn new_step_execution_inherits_step_identity() {
        let step = sample_step();
        let rec = StepExecution::new(Uuid::now_v7(), &step);
        assert_eq!(rec.step_id, step.id);
        assert_eq!(rec.step_order, 1);
        assert_eq!(rec.status, StepExecutionStatus::Pending);
        assert_eq!(rec.attempt, 0);
        assert!(rec.input_context.is_empty());
    }

    #[test]
    fn execution_json_roundtrip() {
        let step = sample_step();
        let exec = Execution::new(Uuid::now_v7(), "demo".to_string(), vec![step]);
        let json = serde_json::to_string(&exec).unwrap();
        let parsed: Execution = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, exec.id);
        assert_eq!(parsed.snapshot.len(), 1);
        assert_eq!(parsed.status, ExecutionStatus::Pending);
    }

    #[test]
    fn step_execution_json_roundtrip() {
        let step = sample_step();
        let mut rec = StepExecution::new(Uuid::now_v7(), &step);
        rec.attempt = 2;
        rec.status = StepExecutionStatus::Retrying;
        rec.response = Some("not done".to_string());
        rec.criteria_passed = Some(false);
        let json = serde_json::to_string(&rec).unwrap();
        let parsed: StepExecution = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.attempt, 2);
        assert_eq!(parsed.status, StepExecutionStatus::Retrying);
        assert_eq!(parsed.criteria_passed, Some(false));
    }
}
