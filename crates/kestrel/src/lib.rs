//! Agentic LLM runtime with token budgeting and layered history compression.
//!
//! `kestrel` runs the classic tool-use loop: a user message goes into the
//! conversation history, the history (optionally compressed) is sent to an
//! [`LlmProvider`](provider::LlmProvider) together with the tool schema, any
//! tool calls the model requests are dispatched through a
//! [`ToolExecutor`](tools::ToolExecutor), and the results are fed back until
//! the model answers in plain text or the iteration cap is hit.
//!
//! The interesting engineering sits around that loop:
//!
//! - [`TokenEstimator`](context::TokenEstimator) approximates token counts with
//!   a mixed-script heuristic and memoizes results in a shared LRU.
//! - [`HistoryCompressor`](context::HistoryCompressor) rewrites an oversized
//!   history into three tiers: a verbatim recent window, a simplified middle
//!   window, and a single summary of everything older.
//! - [`TokenBudget`](context::TokenBudget) tracks cumulative usage against a
//!   ceiling and reports warning levels and suggestions.
//!
//! # Getting started
//!
//! ```ignore
//! use kestrel::prelude::*;
//!
//! let provider = OpenRouterProvider::new(api_key, "anthropic/claude-sonnet-4")?;
//! let tools = ToolRegistry::new().with(my_tool);
//! let config = AgentConfig::new().with_system_prompt("You are a careful assistant.");
//!
//! let mut agent = Agent::new(&provider, &tools, config);
//! let response = agent.process("list the files in src/").await;
//! if response.success() {
//!     println!("{}", response.content);
//! } else {
//!     eprintln!("{:?}: {}", response.status, response.error.unwrap_or_default());
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Run the loop:** [`Agent`](agent::Agent) and [`AgentConfig`](agent::AgentConfig).
//! - **Observe the loop:** implement [`EventHandler`](agent::EventHandler), or
//!   use [`LoggingHandler`](agent::LoggingHandler) for `tracing` output.
//! - **Define tools:** the [`Tool`](tools::Tool) trait, [`FnTool`](tools::FnTool)
//!   for closures, and [`ToolArgs`](tools::ToolArgs) for typed argument access.
//! - **Plug in a backend:** implement [`LlmProvider`](provider::LlmProvider), or
//!   use [`OpenRouterProvider`](provider::OpenRouterProvider).
//! - **Tune the token machinery:** [`TokenOptimizationConfig`](context::TokenOptimizationConfig).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | [`Agent`](agent::Agent) loop, config, events, prompt building, transcripts |
//! | [`context`] | Token estimation, history compression, budget tracking |
//! | [`tools`] | [`Tool`](tools::Tool) trait, [`ToolRegistry`](tools::ToolRegistry), typed arguments |
//! | [`provider`] | [`LlmProvider`](provider::LlmProvider) contract, OpenRouter adapter, SSE parsing, retry |

pub mod agent;
pub mod context;
pub mod prelude;
pub mod provider;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Re-export schemars for downstream crates deriving tool argument schemas.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use kestrel::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct GrepArgs {
///     pattern: String,
///     #[serde(default)]
///     path: Option<String>,
/// }
///
/// let schema = json_schema_for::<GrepArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"pattern".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the model.
///
/// `id` is opaque and unique within one response; every TOOL message that
/// answers this call carries it back as `tool_call_id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default = "empty_object")]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// One turn in a conversation.
///
/// `tool_calls` is only populated on assistant messages; `tool_call_id` and
/// `is_error` only on tool messages. Content may be empty only for an
/// assistant message that carries tool calls.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

impl Message {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    /// Assistant turn with optional text alongside tool calls.
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(MessageRole::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(MessageRole::Tool, content)
        }
    }

    /// Tool turn reporting a failed execution. The content is still shown to
    /// the model.
    pub fn tool_error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::tool_result(call_id, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ── Tool definitions ───────────────────────────────────────────────

/// Provider-facing tool schema: name, description, and a JSON-Schema
/// object describing the arguments.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content, "hello");

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let assist = Message::assistant("", vec![ToolCall::new("c1", "ls", json!({}))]);
        assert_eq!(assist.role, MessageRole::Assistant);
        assert!(assist.has_tool_calls());

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
        assert!(!tool.is_error);

        let failed = Message::tool_error("call-2", "boom");
        assert!(failed.is_error);
        assert_eq!(failed.tool_call_id.as_deref(), Some("call-2"));
    }

    #[test]
    fn serialization_skips_empty_tool_fields() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
        assert!(json.get("is_error").is_none());
    }

    #[test]
    fn tool_message_survives_serde() {
        let msg = Message::tool_error("c9", "permission denied");
        let text = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn tool_call_arguments_default_to_empty_object() {
        let call: ToolCall = serde_json::from_str(r#"{"id":"1","name":"ls"}"#).unwrap();
        assert_eq!(call.arguments, json!({}));
    }
}
