//! Step runner: drives one step through its attempt loop.
//!
//! Per attempt: assemble the prompt, checkpoint the attempt, invoke the model
//! gateway, account usage, evaluate criteria, and either complete, retry, or
//! fail. Transport failures back off exponentially between attempts; criteria
//! failures retry immediately; configuration errors fail the step without
//! consuming the retry budget.

use std::sync::Arc;

use chrono::Utc;
use stepchain_types::config::ModelRegistry;
use stepchain_types::execution::{StepExecution, StepExecutionStatus};
use stepchain_types::llm::ModelRequest;
use stepchain_types::workflow::StepDefinition;
use uuid::Uuid;

use crate::llm::ModelInvoker;
use crate::repository::execution::ExecutionRepository;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::{build_output_context, build_prompt};
use super::cost::compute_cost;
use super::criteria;
use super::retry::{attempts_allowed, should_retry, BackoffPolicy};

/// Terminal outcome of one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Whether the step completed successfully.
    pub success: bool,
    /// The final step-execution record, as persisted.
    pub record: StepExecution,
}

/// Executes a single step to a terminal per-step outcome.
pub struct StepRunner<M: ModelInvoker> {
    invoker: Arc<M>,
    registry: Arc<ModelRegistry>,
    backoff: BackoffPolicy,
    max_output_tokens: u32,
}

impl<M: ModelInvoker> StepRunner<M> {
    pub fn new(
        invoker: Arc<M>,
        registry: Arc<ModelRegistry>,
        backoff: BackoffPolicy,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            invoker,
            registry,
            backoff,
            max_output_tokens,
        }
    }

    /// Drive `step` to completion or failure, checkpointing every transition.
    ///
    /// Returns `Err` only when persistence itself fails; a failing step is a
    /// normal `StepOutcome { success: false, .. }`.
    pub async fn run<R: ExecutionRepository>(
        &self,
        checkpoint: &CheckpointManager<R>,
        execution_id: Uuid,
        step: &StepDefinition,
        input_context: &str,
    ) -> Result<StepOutcome, CheckpointError> {
        let attempts = attempts_allowed(step.max_retries);
        let mut record = StepExecution::new(execution_id, step);
        record.input_context = input_context.to_string();
        record.prompt_sent = build_prompt(input_context, &step.prompt);

        let mut attempt: u32 = 1;
        loop {
            tracing::info!(
                execution_id = %execution_id,
                step_order = step.order,
                step_name = step.name.as_str(),
                attempt,
                attempts,
                "running step attempt"
            );

            record.attempt = attempt;
            record.status = if attempt == 1 {
                StepExecutionStatus::Running
            } else {
                StepExecutionStatus::Retrying
            };
            record.started_at = Some(Utc::now());
            checkpoint.checkpoint_step(&record).await?;

            let request =
                ModelRequest::new(&step.model, record.prompt_sent.clone(), self.max_output_tokens);

            match self.invoker.invoke(&request).await {
                Err(err) if err.is_transport() => {
                    record.error = Some(err.to_string());
                    record.response = None;

                    if should_retry(attempt, step.max_retries) {
                        record.status = StepExecutionStatus::Retrying;
                        checkpoint.checkpoint_step(&record).await?;

                        let delay = self.backoff.delay_after(attempt);
                        tracing::warn!(
                            execution_id = %execution_id,
                            step_order = step.order,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "transport failure, backing off before retry"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    return self
                        .fail(
                            checkpoint,
                            record,
                            format!("Model call failed after {attempts} attempt(s): {err}"),
                        )
                        .await;
                }
                Err(err) => {
                    // Non-transport gateway errors are static; retrying cannot fix them
                    return self
                        .fail(checkpoint, record, format!("Model call failed: {err}"))
                        .await;
                }
                Ok(response) => {
                    let usage = response.usage;
                    record.response = Some(response.text.clone());
                    record.prompt_tokens = usage.prompt_tokens;
                    record.completion_tokens = usage.completion_tokens;
                    record.total_tokens = usage.total();

                    match compute_cost(&self.registry, &step.model, usage) {
                        Ok(cost) => record.cost_usd = cost,
                        Err(err) => {
                            return self.fail(checkpoint, record, err.to_string()).await;
                        }
                    }

                    checkpoint.checkpoint_step(&record).await?;
                    checkpoint
                        .accumulate_usage(execution_id, usage.total() as u64, record.cost_usd)
                        .await?;

                    let verdict = match criteria::evaluate(
                        self.invoker.as_ref(),
                        step,
                        &response.text,
                        self.max_output_tokens,
                    )
                    .await
                    {
                        Ok(verdict) => verdict,
                        Err(err) => {
                            // Malformed criterion: configuration error, no retry
                            record.criteria_passed = Some(false);
                            record.criteria_detail = Some(err.to_string());
                            return self.fail(checkpoint, record, err.to_string()).await;
                        }
                    };

                    record.criteria_passed = Some(verdict.passed);
                    record.criteria_detail = Some(verdict.detail.clone());

                    if verdict.passed {
                        record.output_context =
                            Some(build_output_context(&step.context_mode, &response.text));
                        record.status = StepExecutionStatus::Completed;
                        record.completed_at = Some(Utc::now());
                        record.error = None;
                        checkpoint.checkpoint_step(&record).await?;

                        tracing::info!(
                            execution_id = %execution_id,
                            step_order = step.order,
                            attempt,
                            tokens = record.total_tokens,
                            "step completed"
                        );
                        return Ok(StepOutcome {
                            success: true,
                            record,
                        });
                    }

                    record.error = Some(format!("Criteria not met: {}", verdict.detail));

                    if should_retry(attempt, step.max_retries) {
                        // Criteria retries re-invoke immediately, no backoff
                        record.status = StepExecutionStatus::Retrying;
                        checkpoint.checkpoint_step(&record).await?;
                        attempt += 1;
                        continue;
                    }

                    return self
                        .fail(
                            checkpoint,
                            record,
                            format!(
                                "Criteria not met after {attempts} attempt(s): {}",
                                verdict.detail
                            ),
                        )
                        .await;
                }
            }
        }
    }

    async fn fail<R: ExecutionRepository>(
        &self,
        checkpoint: &CheckpointManager<R>,
        mut record: StepExecution,
        error: String,
    ) -> Result<StepOutcome, CheckpointError> {
        tracing::warn!(
            execution_id = %record.execution_id,
            step_order = record.step_order,
            attempt = record.attempt,
            error = error.as_str(),
            "step failed"
        );
        record.status = StepExecutionStatus::Failed;
        record.error = Some(error);
        record.completed_at = Some(Utc::now());
        checkpoint.checkpoint_step(&record).await?;
        Ok(StepOutcome {
            success: false,
            record,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::repository::memory::InMemoryExecutionRepository;
    use stepchain_types::execution::Execution;
    use stepchain_types::llm::{LlmError, ModelResponse, TokenUsage};
    use stepchain_types::workflow::{ContextMode, Criteria};

    /// Invoker that replays a scripted sequence of results.
    pub(crate) struct ScriptedInvoker {
        script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
        pub calls: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedInvoker {
        pub fn new(script: Vec<Result<ModelResponse, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn reply(text: &str) -> Result<ModelResponse, LlmError> {
            Ok(ModelResponse {
                text: text.to_string(),
                usage: TokenUsage::new(10, 5),
            })
        }
    }

    impl ModelInvoker for ScriptedInvoker {
        async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
            self.calls.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Network("script exhausted".to_string())))
        }
    }

    fn step(criteria: Criteria, max_retries: u32, context_mode: ContextMode) -> StepDefinition {
        StepDefinition {
            id: Uuid::now_v7(),
            order: 1,
            name: "step-under-test".to_string(),
            model: "kimi-k2p5".to_string(),
            prompt: "Do the thing".to_string(),
            criteria,
            max_retries,
            context_mode,
        }
    }

    struct Harness {
        checkpoint: CheckpointManager<InMemoryExecutionRepository>,
        repo: InMemoryExecutionRepository,
        execution_id: Uuid,
    }

    async fn harness(step_def: &StepDefinition) -> Harness {
        let repo = InMemoryExecutionRepository::new();
        let execution = Execution::new(Uuid::now_v7(), "test".to_string(), vec![step_def.clone()]);
        let execution_id = execution.id;
        repo.create_execution(&execution).await.unwrap();
        Harness {
            checkpoint: CheckpointManager::new(repo.clone()),
            repo,
            execution_id,
        }
    }

    fn runner(invoker: Arc<ScriptedInvoker>) -> StepRunner<ScriptedInvoker> {
        StepRunner::new(
            invoker,
            Arc::new(ModelRegistry::default()),
            BackoffPolicy::default(),
            4000,
        )
    }

    #[tokio::test]
    async fn passes_first_attempt_and_builds_context() {
        let step_def = step(
            Criteria::Contains {
                value: "42".to_string(),
            },
            2,
            ContextMode::Full,
        );
        let h = harness(&step_def).await;
        let invoker = Arc::new(ScriptedInvoker::new(vec![ScriptedInvoker::reply(
            "Result: 42",
        )]));

        let outcome = runner(invoker)
            .run(&h.checkpoint, h.execution_id, &step_def, "")
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.record.attempt, 1);
        assert_eq!(outcome.record.status, StepExecutionStatus::Completed);
        assert_eq!(outcome.record.criteria_passed, Some(true));
        assert_eq!(outcome.record.output_context.as_deref(), Some("Result: 42"));
        assert!(outcome.record.error.is_none());
    }

    #[tokio::test]
    async fn retries_criteria_failure_until_done() {
        // contains DONE, max_retries=2, replies "not done", "not done",
        // "DONE" -> 3 attempts, completed
        let step_def = step(
            Criteria::Contains {
                value: "DONE".to_string(),
            },
            2,
            ContextMode::Full,
        );
        let h = harness(&step_def).await;
        let invoker = Arc::new(ScriptedInvoker::new(vec![
            ScriptedInvoker::reply("not done"),
            ScriptedInvoker::reply("not done"),
            ScriptedInvoker::reply("DONE"),
        ]));

        let outcome = runner(invoker.clone())
            .run(&h.checkpoint, h.execution_id, &step_def, "")
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.record.attempt, 3);
        assert_eq!(outcome.record.status, StepExecutionStatus::Completed);
        assert_eq!(outcome.record.criteria_passed, Some(true));
        assert_eq!(invoker.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_exhaust_budget() {
        // max_retries=1, transport always fails -> 2 attempts
        let step_def = step(Criteria::AlwaysPass, 1, ContextMode::Full);
        let h = harness(&step_def).await;
        let invoker = Arc::new(ScriptedInvoker::new(vec![
            Err(LlmError::Timeout),
            Err(LlmError::Timeout),
        ]));

        let outcome = runner(invoker.clone())
            .run(&h.checkpoint, h.execution_id, &step_def, "")
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.record.attempt, 2);
        assert_eq!(outcome.record.status, StepExecutionStatus::Failed);
        assert!(outcome.record.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(invoker.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_then_success_recovers() {
        let step_def = step(Criteria::AlwaysPass, 1, ContextMode::Full);
        let h = harness(&step_def).await;
        let invoker = Arc::new(ScriptedInvoker::new(vec![
            Err(LlmError::RateLimited {
                retry_after_ms: None,
            }),
            ScriptedInvoker::reply("fine now"),
        ]));

        let outcome = runner(invoker)
            .run(&h.checkpoint, h.execution_id, &step_def, "")
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.record.attempt, 2);
        // Transient error from attempt 1 is cleared on success
        assert!(outcome.record.error.is_none());
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let step_def = step(
            Criteria::Contains {
                value: "DONE".to_string(),
            },
            0,
            ContextMode::Full,
        );
        let h = harness(&step_def).await;
        let invoker = Arc::new(ScriptedInvoker::new(vec![ScriptedInvoker::reply(
            "not done",
        )]));

        let outcome = runner(invoker.clone())
            .run(&h.checkpoint, h.execution_id, &step_def, "")
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.record.attempt, 1);
        assert_eq!(invoker.calls.lock().unwrap().len(), 1);
        assert!(outcome
            .record
            .error
            .as_deref()
            .unwrap()
            .contains("Criteria not met after 1 attempt(s)"));
    }

    #[tokio::test]
    async fn invalid_regex_fails_without_retry() {
        let step_def = step(
            Criteria::Regex {
                pattern: "(unclosed".to_string(),
            },
            3,
            ContextMode::Full,
        );
        let h = harness(&step_def).await;
        let invoker = Arc::new(ScriptedInvoker::new(vec![ScriptedInvoker::reply("text")]));

        let outcome = runner(invoker.clone())
            .run(&h.checkpoint, h.execution_id, &step_def, "")
            .await
            .unwrap();

        assert!(!outcome.success);
        // Retries remained, but a broken pattern is not retryable
        assert_eq!(invoker.calls.lock().unwrap().len(), 1);
        assert!(outcome.record.error.as_deref().unwrap().contains("invalid regex"));
    }

    #[tokio::test]
    async fn unknown_model_fails_without_retry() {
        let mut step_def = step(Criteria::AlwaysPass, 3, ContextMode::Full);
        step_def.model = "not-in-registry".to_string();
        let h = harness(&step_def).await;
        let invoker = Arc::new(ScriptedInvoker::new(vec![ScriptedInvoker::reply("text")]));

        let outcome = runner(invoker.clone())
            .run(&h.checkpoint, h.execution_id, &step_def, "")
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(invoker.calls.lock().unwrap().len(), 1);
        assert!(outcome.record.error.as_deref().unwrap().contains("not-in-registry"));
    }

    #[tokio::test]
    async fn usage_accumulates_across_attempts() {
        let step_def = step(
            Criteria::Contains {
                value: "DONE".to_string(),
            },
            2,
            ContextMode::Full,
        );
        let h = harness(&step_def).await;
        let invoker = Arc::new(ScriptedInvoker::new(vec![
            ScriptedInvoker::reply("not done"),
            ScriptedInvoker::reply("not done"),
            ScriptedInvoker::reply("DONE"),
        ]));

        runner(invoker)
            .run(&h.checkpoint, h.execution_id, &step_def, "")
            .await
            .unwrap();

        // Each attempt used 15 tokens; failed attempts still count
        let execution = h.repo.get_execution(&h.execution_id).await.unwrap().unwrap();
        assert_eq!(execution.total_tokens, 45);
        assert!(execution.total_cost_usd > 0.0);
    }

    #[tokio::test]
    async fn prompt_includes_context_section() {
        let step_def = step(Criteria::AlwaysPass, 0, ContextMode::Full);
        let h = harness(&step_def).await;
        let invoker = Arc::new(ScriptedInvoker::new(vec![ScriptedInvoker::reply("ok")]));

        let outcome = runner(invoker.clone())
            .run(&h.checkpoint, h.execution_id, &step_def, "Result: 42")
            .await
            .unwrap();

        assert_eq!(outcome.record.input_context, "Result: 42");
        let calls = invoker.calls.lock().unwrap();
        assert!(calls[0].prompt.contains("Context from previous step:"));
        assert!(calls[0].prompt.contains("Result: 42"));
        assert!(calls[0].prompt.contains("Your task:\nDo the thing"));
    }

    #[tokio::test]
    async fn code_only_mode_yields_empty_context_without_code() {
        let step_def = step(Criteria::AlwaysPass, 0, ContextMode::CodeOnly);
        let h = harness(&step_def).await;
        let invoker = Arc::new(ScriptedInvoker::new(vec![ScriptedInvoker::reply(
            "prose without fences",
        )]));

        let outcome = runner(invoker)
            .run(&h.checkpoint, h.execution_id, &step_def, "")
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.record.output_context.as_deref(), Some(""));
    }
}
