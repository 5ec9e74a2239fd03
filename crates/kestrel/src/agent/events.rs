//! Events, handlers, and run results for the [`Agent`](super::harness::Agent).
//!
//! The agent reports progress through [`AgentEvent`] variants covering a
//! whole `process()` call, from round start through tool execution to the
//! terminal outcome. Callers implement [`EventHandler`] to observe them for
//! logging, UI rendering, metrics, or approval workflows.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Full control (UI, metrics, approval gates) |

use crate::context::{BudgetUsage, BudgetWarning};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, trace, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the agent during a `process()` call.
#[derive(Debug)]
pub enum AgentEvent<'a> {
    /// A new round is starting.
    RoundStart {
        round: u32,
        max_rounds: u32,
        usage: &'a BudgetUsage,
    },
    /// History was compressed before this round's request.
    Compressed {
        tokens_before: usize,
        tokens_after: usize,
        messages_before: usize,
        messages_after: usize,
    },
    /// The estimated request would exceed the remaining budget.
    BudgetWarning(&'a BudgetWarning),
    /// The model returned text (may be alongside tool calls).
    Text(&'a str),
    /// A streamed text fragment.
    TextDelta(&'a str),
    /// The model is requesting tool calls this round.
    ToolCallsReceived { round: u32, count: usize },
    /// A single tool is about to be executed. Handlers may answer with
    /// [`EventResponse::Deny`] to block it.
    ToolExecuting {
        name: &'a str,
        call_id: &'a str,
        arguments: &'a Value,
    },
    /// A single tool finished executing.
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        result: &'a str,
        success: bool,
    },
    /// Token usage reported by the provider for this round.
    TokenUsage {
        input_tokens: u64,
        output_tokens: u64,
    },
    /// The model answered without tool calls.
    Finished,
    /// The round cap was hit without a final answer.
    IterationLimitReached { max_rounds: u32 },
    /// The cancellation token fired.
    Cancelled,
    /// The provider call failed.
    ProviderFailed { error: &'a str },
}

impl AgentEvent<'_> {
    /// Total tokens for a `TokenUsage` event, `None` for all others.
    pub fn total_tokens(&self) -> Option<u64> {
        if let AgentEvent::TokenUsage {
            input_tokens,
            output_tokens,
        } = self
        {
            Some(input_tokens + output_tokens)
        } else {
            None
        }
    }
}

/// Response from an event handler for events that support feedback.
///
/// Only [`AgentEvent::ToolExecuting`] consults the response. Everything else
/// ignores it.
#[derive(Debug, Clone, PartialEq)]
pub enum EventResponse {
    /// Let the pending tool call run.
    Approve,
    /// Block the pending tool call. The reason becomes the tool's error
    /// text, and the round fails like any other tool failure.
    Deny(String),
}

/// Handler for agent events.
///
/// The default implementation returns `None` (auto-approve, no side
/// effects).
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl EventHandler for Printer {
///     fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
///         match event {
///             AgentEvent::Text(text) => println!("{text}"),
///             AgentEvent::ToolExecuting { name, .. } if *name == "shell" => {
///                 return Some(EventResponse::Deny("shell disabled".into()));
///             }
///             _ => {}
///         }
///         None
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for each event during the run.
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        let _ = event;
        None
    }
}

/// A no-op event handler that auto-approves all actions.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let AgentEvent::Text(text) = event {
///         println!("{text}");
///     }
///     None
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&AgentEvent<'_>) -> Option<EventResponse> + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) -> Option<EventResponse> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) -> Option<EventResponse> + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers.
///
/// Events are dispatched to every handler in order. The first non-`None`
/// response wins, but later handlers still see the event.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, my_ui_handler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain. Handlers are called in registration order.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        let mut first = None;
        for handler in &self.handlers {
            let response = handler.on_event(event);
            if first.is_none() {
                first = response;
            }
        }
        first
    }
}

/// Maps every [`AgentEvent`] onto a `tracing` call.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        match event {
            AgentEvent::RoundStart {
                round,
                max_rounds,
                usage,
            } => {
                info!("[round {round}/{max_rounds}] {}", usage.to_log_string());
            }
            AgentEvent::Compressed {
                tokens_before,
                tokens_after,
                messages_before,
                messages_after,
            } => {
                info!(
                    "Compressed history: {messages_before} -> {messages_after} messages, \
                     ~{tokens_before} -> ~{tokens_after} tokens"
                );
            }
            AgentEvent::BudgetWarning(w) => {
                warn!(
                    "Token budget: request needs ~{} tokens, {} remaining ({:.0}% used). {}",
                    w.estimated_request_tokens, w.remaining, w.usage_pct, w.suggestion
                );
            }
            AgentEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.chars().count() > 200 { "..." } else { "" }
                );
            }
            AgentEvent::TextDelta(delta) => {
                trace!("delta: {delta}");
            }
            AgentEvent::ToolCallsReceived { round, count } => {
                debug!("{count} tool call(s) in round {round}");
            }
            AgentEvent::ToolExecuting { name, .. } => {
                debug!("Executing tool: {name}");
            }
            AgentEvent::ToolResult {
                name,
                result,
                success,
                ..
            } => {
                if *success {
                    debug!("Tool {name} result: {} bytes", result.len());
                } else {
                    warn!("Tool {name} failed: {result}");
                }
            }
            AgentEvent::TokenUsage {
                input_tokens,
                output_tokens,
            } => {
                debug!("Tokens: input={input_tokens}, output={output_tokens}");
            }
            AgentEvent::Finished => {
                info!("Agent finished (no more tool calls)");
            }
            AgentEvent::IterationLimitReached { max_rounds } => {
                warn!("Agent hit round limit ({max_rounds}) without a final answer");
            }
            AgentEvent::Cancelled => {
                info!("Agent run cancelled");
            }
            AgentEvent::ProviderFailed { error } => {
                warn!("Provider call failed: {error}");
            }
        }
        None
    }
}

// ── Result ─────────────────────────────────────────────────────────

/// How a `process()` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The model produced an answer without tool calls.
    Completed,
    /// The provider call failed. Never retried by the agent.
    ProviderFailed,
    /// At least one tool call in the last round failed.
    ToolFailed,
    /// `max_iterations` rounds ran without a final answer.
    IterationsExhausted,
    /// The cancellation token fired.
    Cancelled,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseStatus::Completed => "completed",
            ResponseStatus::ProviderFailed => "provider failed",
            ResponseStatus::ToolFailed => "tool failed",
            ResponseStatus::IterationsExhausted => "iterations exhausted",
            ResponseStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of a `process()` or `process_stream()` call.
///
/// Failures are carried here rather than returned as `Err`; check
/// [`success`](Self::success) or match on [`status`](Self::status).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResponse {
    pub status: ResponseStatus,
    /// The final answer, or the last assistant text produced before a
    /// failure or exhaustion.
    pub content: String,
    pub error: Option<String>,
    /// Provider round-trips made.
    pub iterations: u32,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

impl AgentResponse {
    pub(crate) fn new(status: ResponseStatus) -> Self {
        Self {
            status,
            content: String::new(),
            error: None,
            iterations: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
        }
    }

    /// True only for [`ResponseStatus::Completed`].
    pub fn success(&self) -> bool {
        self.status == ResponseStatus::Completed
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }
}
