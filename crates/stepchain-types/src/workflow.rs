//! Workflow definition types for Stepchain.
//!
//! A workflow is a linear pipeline of model-backed steps. Each step carries a
//! prompt, a success criterion, a retry bound, and a rule for how its output
//! becomes the next step's input context. The JSON representation (API) and
//! the YAML representation (CLI file import/export) both map onto these types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn new_id() -> Uuid {
    Uuid::now_v7()
}

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A user-defined pipeline of steps, executed strictly in `order`.
///
/// Definitions are read-only to the engine: a run operates on a snapshot of
/// `steps` taken at launch time, so later edits never affect an in-flight or
/// completed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7, generated when absent so definitions can be authored by hand.
    #[serde(default = "new_id")]
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered list of steps. Must be non-empty before the workflow can run,
    /// with dense `order` values starting at 1.
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Steps sorted by ascending `order`.
    pub fn ordered_steps(&self) -> Vec<&StepDefinition> {
        let mut steps: Vec<&StepDefinition> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single model invocation stage within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// UUIDv7, generated when absent so definitions can be authored by hand.
    #[serde(default = "new_id")]
    pub id: Uuid,
    /// Execution position (1, 2, 3...). Unique within a workflow.
    pub order: u32,
    /// Human-readable step name.
    pub name: String,
    /// Model identifier, resolved against the model registry.
    pub model: String,
    /// Prompt template text. Non-empty.
    pub prompt: String,
    /// Success criterion applied to the model response.
    #[serde(default)]
    pub criteria: Criteria,
    /// Number of retries after the initial attempt. 0 means exactly one attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How this step's output becomes the next step's input context.
    #[serde(default)]
    pub context_mode: ContextMode,
}

fn default_max_retries() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Criteria
// ---------------------------------------------------------------------------

/// The rule used to judge whether a step's response is acceptable.
///
/// Internally tagged by `type` to match the wire structure:
/// ```yaml
/// criteria:
///   type: contains
///   value: DONE
/// ```
///
/// The variants that need a payload carry it in the variant itself, so a
/// criterion can never be missing its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Criteria {
    /// Step always succeeds after a response arrives.
    #[default]
    AlwaysPass,
    /// Response must contain `value` as a case-sensitive substring.
    Contains { value: String },
    /// `pattern` must match somewhere in the response.
    Regex { pattern: String },
    /// Response must contain a fenced code block; when `language` is set, the
    /// fence tag must match it.
    CodeBlock {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// A second model call judges the response against `rubric`.
    LlmJudge { rubric: String },
}

impl Criteria {
    /// Short tag used for display and structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Criteria::AlwaysPass => "always_pass",
            Criteria::Contains { .. } => "contains",
            Criteria::Regex { .. } => "regex",
            Criteria::CodeBlock { .. } => "code_block",
            Criteria::LlmJudge { .. } => "llm_judge",
        }
    }
}

// ---------------------------------------------------------------------------
// Context mode
// ---------------------------------------------------------------------------

/// The rule for transforming a step's response into the next step's input.
///
/// Internally tagged like [`Criteria`]; the `custom` variant carries its
/// template, so a custom mode can never be missing one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextMode {
    /// Pass the entire response verbatim.
    #[default]
    Full,
    /// Pass only the fenced code blocks, in order of appearance.
    CodeOnly,
    /// Render `template`, substituting `{{output}}` with the full response
    /// and `{{code}}` with the extracted code blocks.
    Custom { template: String },
}

impl ContextMode {
    /// Short tag used for display and structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ContextMode::Full => "full",
            ContextMode::CodeOnly => "code_only",
            ContextMode::Custom { .. } => "custom",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
