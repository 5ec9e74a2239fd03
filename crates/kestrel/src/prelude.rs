//! Convenience re-exports for common `kestrel` types.
//!
//! ```ignore
//! use kestrel::prelude::*;
//! ```
//!
//! Pulls in what most agent programs need: the [`Agent`] and its config,
//! event handlers, [`Message`] constructors, the tool traits, and the
//! OpenRouter provider. Compressor internals, SSE decoding, and retry
//! tuning stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, MessageRole, ToolCall, ToolDefinition, json_schema_for};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    Agent, AgentConfig, AgentEvent, AgentResponse, CompositeEventHandler, EventHandler,
    EventResponse, FnEventHandler, LoggingHandler, NoopHandler, PromptBuilder, ResponseStatus,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{TokenBudget, TokenEstimator, TokenOptimizationConfig, WarningLevel};

// ── Providers ───────────────────────────────────────────────────────
pub use crate::provider::{ChatRequest, ChatResponse, LlmProvider, OpenRouterProvider, ProviderError};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    FnTool, ParamError, ParamType, Tool, ToolArgs, ToolDescription, ToolError, ToolExecutor,
    ToolFuture, ToolParameter, ToolRegistry, ToolResult,
};
