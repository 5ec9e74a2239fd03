//! Request assembly: system prompt, tool schema, and the outbound message list.
//!
//! [`PromptBuilder`] assembles multi-section system prompts. The free
//! functions turn the executor's [`ToolDescription`]s into provider-facing
//! [`ToolDefinition`]s and prepend the system prompt to a history copy.

use crate::tools::ToolDescription;
use crate::{Message, ToolDefinition};

/// Builder for multi-section system prompts.
///
/// Sections are joined with double newlines. Empty sections (from
/// `section_if` with a false condition, `section_opt` with `None`, or empty
/// content) are skipped.
///
/// # Example
///
/// ```
/// use kestrel::agent::PromptBuilder;
///
/// let prompt = PromptBuilder::new("You are a helpful agent.")
///     .section("Context", "Working directory: /srv/app")
///     .section_if(false, "Debug", || "verbose".into())
///     .section_opt("Notes", None::<String>)
///     .build();
///
/// assert_eq!(prompt, "You are a helpful agent.\n\n## Context\n\nWorking directory: /srv/app");
/// ```
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<String>,
}

impl PromptBuilder {
    /// Start with a preamble, included as-is without a heading.
    pub fn new(preamble: impl Into<String>) -> Self {
        Self::default().raw(preamble)
    }

    /// Append a `## heading` section. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// Append a section only when `condition` holds. `content_fn` runs lazily.
    pub fn section_if(
        self,
        condition: bool,
        heading: &str,
        content_fn: impl FnOnce() -> String,
    ) -> Self {
        if condition {
            self.section(heading, content_fn())
        } else {
            self
        }
    }

    /// Append a section only if the content is `Some`.
    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    /// Append raw text without a heading. Skipped if empty.
    pub fn raw(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(content);
        }
        self
    }

    /// Append a "Tools" section with one bullet per tool and its parameters.
    pub fn tool_guide(self, tools: &[ToolDescription]) -> Self {
        self.section("Tools", render_tool_guide(tools))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

fn render_tool_guide(tools: &[ToolDescription]) -> String {
    let mut out = String::new();
    for tool in tools {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("- `{}`: {}", tool.name, tool.description));
        for p in &tool.parameters {
            let req = if p.required { "required" } else { "optional" };
            out.push_str(&format!(
                "\n  - `{}` ({}, {req}): {}",
                p.name,
                p.param_type.as_str(),
                p.description
            ));
        }
    }
    out
}

/// Convert executor descriptions into the schema handed to the provider.
pub fn tool_definitions(descriptions: &[ToolDescription]) -> Vec<ToolDefinition> {
    descriptions
        .iter()
        .map(|d| ToolDefinition::new(d.name.clone(), d.description.clone(), d.input_schema()))
        .collect()
}

/// The outbound message list: an optional SYSTEM message followed by
/// `history` in order.
pub fn build_messages(system_prompt: Option<&str>, history: Vec<Message>) -> Vec<Message> {
    match system_prompt {
        Some(prompt) if !prompt.is_empty() => {
            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(Message::system(prompt));
            messages.extend(history);
            messages
        }
        _ => history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;
    use crate::tools::{ParamType, ToolParameter};
    use serde_json::json;

    fn read_file() -> ToolDescription {
        ToolDescription::new("read_file", "Read a file from disk.")
            .param(ToolParameter::required("path", ParamType::String, "File path"))
            .param(ToolParameter::optional("limit", ParamType::Integer, "Max lines"))
    }

    #[test]
    fn preamble_only() {
        assert_eq!(PromptBuilder::new("You are an agent.").build(), "You are an agent.");
    }

    #[test]
    fn empty_sections_skipped() {
        let prompt = PromptBuilder::new("P")
            .section("Empty", "")
            .section_if(false, "Hidden", || "x".into())
            .section_opt("Missing", None::<String>)
            .section("Present", "content")
            .build();
        assert_eq!(prompt, "P\n\n## Present\n\ncontent");
    }

    #[test]
    fn empty_preamble_is_dropped() {
        let builder = PromptBuilder::new("");
        assert!(builder.is_empty());
        assert_eq!(builder.section("A", "b").build(), "## A\n\nb");
    }

    #[test]
    fn tool_guide_lists_parameters() {
        let prompt = PromptBuilder::new("P").tool_guide(&[read_file()]).build();
        assert!(prompt.contains("## Tools"));
        assert!(prompt.contains("- `read_file`: Read a file from disk."));
        assert!(prompt.contains("  - `path` (string, required): File path"));
        assert!(prompt.contains("  - `limit` (integer, optional): Max lines"));
    }

    #[test]
    fn tool_guide_without_tools_adds_nothing() {
        assert_eq!(PromptBuilder::new("P").tool_guide(&[]).build(), "P");
    }

    #[test]
    fn definitions_carry_input_schema() {
        let defs = tool_definitions(&[read_file()]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "read_file");
        assert_eq!(defs[0].input_schema["type"], "object");
        assert_eq!(defs[0].input_schema["required"], json!(["path"]));
    }

    #[test]
    fn system_prompt_is_prepended() {
        let history = vec![Message::user("hi")];
        let messages = build_messages(Some("Be brief."), history.clone());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[1], history[0]);

        assert_eq!(build_messages(None, history.clone()), history);
        assert_eq!(build_messages(Some(""), history.clone()), history);
    }
}
