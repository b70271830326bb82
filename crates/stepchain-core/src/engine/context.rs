//! Context building: prompt assembly, code extraction, and the rules for
//! turning one step's response into the next step's input.
//!
//! Everything here is pure -- no IO, no engine state.

use std::sync::OnceLock;

use regex::Regex;
use stepchain_types::workflow::ContextMode;

/// Placeholder replaced with the full response in custom templates.
pub const OUTPUT_PLACEHOLDER: &str = "{{output}}";

/// Placeholder replaced with the extracted code in custom templates.
pub const CODE_PLACEHOLDER: &str = "{{code}}";

/// A fenced code block extracted from a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Language tag on the opening fence, when present.
    pub language: Option<String>,
    /// Block content, without the fences.
    pub content: String,
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // ```lang\n ... ``` with an optional language tag
        Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\n(.*?)```").expect("fence regex is valid")
    })
}

/// Extract all fenced code blocks from markdown-formatted text, in order of
/// appearance.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    fence_regex()
        .captures_iter(text)
        .map(|caps| {
            let tag = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            CodeBlock {
                language: if tag.is_empty() {
                    None
                } else {
                    Some(tag.to_string())
                },
                content: caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string(),
            }
        })
        .collect()
}

/// Assemble the prompt actually sent to the model.
///
/// A non-empty input context is prepended under a delimited section so the
/// model can tell the handoff apart from the task itself.
pub fn build_prompt(input_context: &str, step_prompt: &str) -> String {
    if input_context.is_empty() {
        step_prompt.to_string()
    } else {
        format!(
            "Context from previous step:\n\n{input_context}\n\n---\n\nYour task:\n{step_prompt}"
        )
    }
}

/// Compute the context string handed to the next step.
///
/// - `Full`: the response verbatim.
/// - `CodeOnly`: all fenced blocks concatenated in order; empty when none.
/// - `Custom`: the template with `{{output}}` and `{{code}}` substituted;
///   unresolved placeholders are left verbatim so templates may contain
///   literal braces.
pub fn build_output_context(mode: &ContextMode, response: &str) -> String {
    match mode {
        ContextMode::Full => response.to_string(),
        ContextMode::CodeOnly => joined_code(response),
        ContextMode::Custom { template } => {
            let mut rendered = template.clone();
            if rendered.contains(OUTPUT_PLACEHOLDER) {
                rendered = rendered.replace(OUTPUT_PLACEHOLDER, response);
            }
            if rendered.contains(CODE_PLACEHOLDER) {
                rendered = rendered.replace(CODE_PLACEHOLDER, &joined_code(response));
            }
            rendered
        }
    }
}

fn joined_code(response: &str) -> String {
    extract_code_blocks(response)
        .iter()
        .map(|b| b.content.trim_end_matches('\n'))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_BLOCKS: &str = "Here is the code:\n\
```python\nprint(\"hi\")\n```\n\
And a helper:\n\
```\nx = 1\n```\n\
Done.";

    #[test]
    fn extracts_blocks_in_order_with_language_tags() {
        let blocks = extract_code_blocks(TWO_BLOCKS);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language.as_deref(), Some("python"));
        assert_eq!(blocks[0].content, "print(\"hi\")\n");
        assert_eq!(blocks[1].language, None);
        assert_eq!(blocks[1].content, "x = 1\n");
    }

    #[test]
    fn no_fences_yields_no_blocks() {
        assert!(extract_code_blocks("just prose, no code").is_empty());
    }

    #[test]
    fn build_prompt_without_context_is_bare() {
        assert_eq!(build_prompt("", "Write a poem"), "Write a poem");
    }

    #[test]
    fn build_prompt_with_context_delimits_sections() {
        let prompt = build_prompt("Result: 42", "Double it");
        assert!(prompt.starts_with("Context from previous step:\n\nResult: 42"));
        assert!(prompt.contains("---"));
        assert!(prompt.ends_with("Your task:\nDouble it"));
    }

    #[test]
    fn full_mode_passes_response_verbatim() {
        assert_eq!(
            build_output_context(&ContextMode::Full, "Result: 42"),
            "Result: 42"
        );
    }

    #[test]
    fn code_only_concatenates_blocks() {
        let ctx = build_output_context(&ContextMode::CodeOnly, TWO_BLOCKS);
        assert_eq!(ctx, "print(\"hi\")\n\nx = 1");
    }

    #[test]
    fn code_only_without_code_is_empty() {
        assert_eq!(
            build_output_context(&ContextMode::CodeOnly, "no code here"),
            ""
        );
    }

    #[test]
    fn custom_output_placeholder_matches_full_mode() {
        let mode = ContextMode::Custom {
            template: OUTPUT_PLACEHOLDER.to_string(),
        };
        let full = build_output_context(&ContextMode::Full, TWO_BLOCKS);
        assert_eq!(build_output_context(&mode, TWO_BLOCKS), full);
    }

    #[test]
    fn custom_substitutes_both_placeholders() {
        let mode = ContextMode::Custom {
            template: "OUT={{output}} CODE={{code}}".to_string(),
        };
        let ctx = build_output_context(&mode, "text\n```\ncode\n```");
        assert_eq!(ctx, "OUT=text\n```\ncode\n``` CODE=code");
    }

    #[test]
    fn custom_leaves_unknown_placeholders_verbatim() {
        let mode = ContextMode::Custom {
            template: "{{unknown}} and {{output}}".to_string(),
        };
        let ctx = build_output_context(&mode, "hi");
        assert_eq!(ctx, "{{unknown}} and hi");
    }
}
