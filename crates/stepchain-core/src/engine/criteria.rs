//! Criteria evaluation for step responses.
//!
//! One evaluation function per criterion kind, dispatched exhaustively over
//! the [`Criteria`] enum. All kinds are pure except `llm_judge`, which issues
//! its own model call; a judge-side gateway failure counts as a criteria
//! failure, not a transport failure -- the step attempt as a whole is retried
//! if its budget allows.

use regex::Regex;
use stepchain_types::workflow::{Criteria, StepDefinition};

use crate::llm::ModelInvoker;
use stepchain_types::llm::ModelRequest;

/// Low temperature keeps judge verdicts consistent across retries.
const JUDGE_TEMPERATURE: f64 = 0.1;

/// Outcome of evaluating a criterion against a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriteriaVerdict {
    pub passed: bool,
    /// Human-readable explanation, persisted as `criteria_detail`.
    pub detail: String,
}

impl CriteriaVerdict {
    fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Errors from criteria evaluation.
///
/// These are configuration errors: a malformed pattern cannot be fixed by
/// retrying, so the step fails immediately.
#[derive(Debug, thiserror::Error)]
pub enum CriteriaError {
    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Evaluate a step's criteria against its response.
pub async fn evaluate<M: ModelInvoker>(
    invoker: &M,
    step: &StepDefinition,
    response: &str,
    judge_max_tokens: u32,
) -> Result<CriteriaVerdict, CriteriaError> {
    match &step.criteria {
        Criteria::AlwaysPass => Ok(CriteriaVerdict::pass("No criteria enforced")),
        Criteria::Contains { value } => Ok(check_contains(response, value)),
        Criteria::Regex { pattern } => check_regex(response, pattern),
        Criteria::CodeBlock { language } => Ok(check_code_block(response, language.as_deref())),
        Criteria::LlmJudge { rubric } => Ok(judge(
            invoker,
            &step.model,
            &step.prompt,
            response,
            rubric,
            judge_max_tokens,
        )
        .await),
    }
}

/// Case-sensitive substring check.
pub fn check_contains(response: &str, value: &str) -> CriteriaVerdict {
    if response.contains(value) {
        CriteriaVerdict::pass(format!("Output contains '{value}'"))
    } else {
        CriteriaVerdict::fail(format!("Output does not contain '{value}'"))
    }
}

/// Pattern match anywhere in the response.
///
/// The pattern is compiled per evaluation; an invalid pattern is a
/// configuration error, not a retryable failure.
pub fn check_regex(response: &str, pattern: &str) -> Result<CriteriaVerdict, CriteriaError> {
    let re = Regex::new(pattern).map_err(|e| CriteriaError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    match re.find(response) {
        Some(m) => {
            let mut found = m.as_str().to_string();
            if found.len() > 100 {
                found.truncate(100);
            }
            Ok(CriteriaVerdict::pass(format!(
                "Output matches pattern. Found: '{found}'"
            )))
        }
        None => Ok(CriteriaVerdict::fail(format!(
            "Output does not match pattern '{pattern}'"
        ))),
    }
}

/// Fenced code block presence, optionally constrained to a language tag.
pub fn check_code_block(response: &str, language: Option<&str>) -> CriteriaVerdict {
    let blocks = super::context::extract_code_blocks(response);
    if blocks.is_empty() {
        return CriteriaVerdict::fail("No code blocks found in output");
    }

    match language {
        None => CriteriaVerdict::pass(format!("Found {} code block(s) in output", blocks.len())),
        Some(wanted) => {
            let matching = blocks
                .iter()
                .filter(|b| {
                    b.language
                        .as_deref()
                        .is_some_and(|tag| tag.eq_ignore_ascii_case(wanted))
                })
                .count();
            if matching > 0 {
                CriteriaVerdict::pass(format!(
                    "Found {matching} code block(s) with language '{wanted}'"
                ))
            } else {
                CriteriaVerdict::fail(format!(
                    "Found {} code block(s) but none with language '{wanted}'",
                    blocks.len()
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LLM judge
// ---------------------------------------------------------------------------

/// Build the judging prompt from the step prompt, the response, and the rubric.
pub fn build_judge_prompt(step_prompt: &str, response: &str, rubric: &str) -> String {
    format!(
        "You are evaluating whether an LLM's output meets specific criteria.\n\
         \n\
         ORIGINAL PROMPT:\n\
         {step_prompt}\n\
         \n\
         LLM OUTPUT:\n\
         {response}\n\
         \n\
         CRITERIA TO EVALUATE:\n\
         {rubric}\n\
         \n\
         Evaluate whether the output meets the criteria. Respond in this exact format:\n\
         PASSED: [YES or NO]\n\
         EXPLANATION: [Brief explanation of your judgment]"
    )
}

/// Parse the judge's reply into a verdict.
///
/// Anything other than an explicit `PASSED: YES` is a failure.
pub fn parse_judge_reply(reply: &str) -> CriteriaVerdict {
    let upper = reply.to_uppercase();
    let passed = upper.contains("PASSED: YES") || upper.contains("PASSED:YES");

    let detail = match reply.split_once("EXPLANATION:") {
        Some((_, explanation)) => explanation.trim().to_string(),
        None => reply.trim().to_string(),
    };

    CriteriaVerdict { passed, detail }
}

async fn judge<M: ModelInvoker>(
    invoker: &M,
    model: &str,
    step_prompt: &str,
    response: &str,
    rubric: &str,
    max_tokens: u32,
) -> CriteriaVerdict {
    let request = ModelRequest::new(model, build_judge_prompt(step_prompt, response, rubric), max_tokens)
        .with_temperature(JUDGE_TEMPERATURE);

    match invoker.invoke(&request).await {
        Ok(reply) => parse_judge_reply(&reply.text),
        Err(e) => {
            tracing::warn!(model, error = %e, "judge call failed");
            CriteriaVerdict::fail(format!("Could not evaluate: {e}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
