//! The agent orchestration loop.
//!
//! An [`Agent`] owns one conversation history. [`Agent::process`] appends
//! the user turn, then alternates provider requests and tool execution until
//! the model answers without tool calls, something fails, the round cap is
//! reached, or the cancellation token fires. Before every request the
//! history is checked against the [`TokenBudget`] and compressed by the
//! [`TokenOptimizer`] when it grows past the threshold. The stored history
//! is never rewritten; compression only shapes the outbound copy.

use super::config::AgentConfig;
use super::events::{AgentEvent, AgentResponse, EventHandler, EventResponse, NoopHandler, ResponseStatus};
use super::prompt::{PromptBuilder, build_messages, tool_definitions};
use crate::context::{TokenBudget, TokenOptimizer};
use crate::provider::{ChatRequest, ChatResponse, LlmProvider};
use crate::tools::{ToolDescription, ToolExecutor, ToolResult};
use crate::{Message, ToolCall, ToolDefinition};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Error text for a round aborted by a failing tool call. The tool's own
/// error is in its TOOL message.
pub const TOOL_FAILURE_ERROR: &str = "tool execution failed";

// ── Agent ──────────────────────────────────────────────────────────

/// One conversation with a model and a set of tools.
///
/// ```ignore
/// let provider = OpenRouterProvider::new(api_key, "anthropic/claude-sonnet-4")?;
/// let tools = ToolRegistry::new().with(MyTool);
/// let handler = LoggingHandler;
///
/// let mut agent = Agent::new(&provider, &tools, AgentConfig::new())
///     .with_event_handler(&handler);
/// let response = agent.process("list the files in src/").await;
/// if !response.success() {
///     eprintln!("{}: {}", response.status, response.error.unwrap_or_default());
/// }
/// ```
///
/// # Lifetimes
///
/// `Agent<'a>` borrows the provider, the tool executor, and the event
/// handler. Bind them to `let`s before building the agent.
///
/// # Concurrency
///
/// `process` takes `&mut self`: one call runs to completion before the next
/// can start. The [`TokenBudget`] is behind an `Arc` and may be shared with
/// other agents through [`with_budget`](Self::with_budget).
pub struct Agent<'a> {
    provider: &'a dyn LlmProvider,
    tools: &'a dyn ToolExecutor,
    config: AgentConfig,
    history: Vec<Message>,
    optimizer: TokenOptimizer,
    budget: Arc<TokenBudget>,
    event_handler: &'a dyn EventHandler,
    cancel: Option<CancellationToken>,
}

impl<'a> Agent<'a> {
    /// Create an agent with an empty history. The token budget is sized
    /// from `config.optimization.target_budget` and shares the optimizer's
    /// estimator cache.
    pub fn new(provider: &'a dyn LlmProvider, tools: &'a dyn ToolExecutor, config: AgentConfig) -> Self {
        let optimizer = TokenOptimizer::new(config.optimization.clone());
        let budget = Arc::new(TokenBudget::new(
            config.optimization.target_budget,
            optimizer.estimator().clone(),
        ));
        Self {
            provider,
            tools,
            config,
            history: Vec::new(),
            optimizer,
            budget,
            event_handler: &NoopHandler,
            cancel: None,
        }
    }

    /// Attach an event handler.
    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Race every provider and tool call against `token`. When it fires the
    /// current call is dropped and `process` returns
    /// [`ResponseStatus::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Resume from a saved history.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Use a budget shared with other agents instead of a private one.
    pub fn with_budget(mut self, budget: Arc<TokenBudget>) -> Self {
        self.budget = budget;
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn into_history(self) -> Vec<Message> {
        self.history
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn budget(&self) -> &Arc<TokenBudget> {
        &self.budget
    }

    pub fn optimizer(&self) -> &TokenOptimizer {
        &self.optimizer
    }

    /// Start a fresh conversation: clears history and token usage. The
    /// budget ceiling is kept.
    pub fn reset(&mut self) {
        self.history.clear();
        self.budget.reset_usage();
    }

    fn emit(&self, event: AgentEvent<'_>) -> Option<EventResponse> {
        self.event_handler.on_event(&event)
    }

    // ── Main loop ──────────────────────────────────────────────────

    /// Run one user turn to completion.
    ///
    /// Never returns an error: provider failures, tool failures, exhaustion,
    /// and cancellation are reported through [`AgentResponse::status`].
    /// Makes at most `max_iterations` provider round-trips. On a tool
    /// failure the TOOL messages of the calls up to and including the failing
    /// one stay in history.
    pub async fn process(&mut self, user_message: impl Into<String>) -> AgentResponse {
        self.history.push(Message::user(user_message));
        let max_rounds = self.config.max_iterations;
        let mut response = AgentResponse::new(ResponseStatus::IterationsExhausted);

        for round in 1..=max_rounds {
            if self.is_cancelled() {
                return self.cancelled(response);
            }

            let descriptions = self.tools.descriptions();
            let request = self.prepare_request(round, &descriptions);

            let outcome = match cancellable(self.cancel.as_ref(), self.provider.chat(&request)).await {
                Some(outcome) => outcome,
                None => return self.cancelled(response),
            };
            response.iterations = round;

            let chat = match outcome {
                Ok(chat) => chat,
                Err(e) => {
                    let error = e.to_string();
                    self.emit(AgentEvent::ProviderFailed { error: &error });
                    response.status = ResponseStatus::ProviderFailed;
                    response.error = Some(error);
                    return response;
                }
            };

            let calls = self.record_reply(chat, &mut response);
            if calls.is_empty() {
                self.emit(AgentEvent::Finished);
                response.status = ResponseStatus::Completed;
                return response;
            }

            self.emit(AgentEvent::ToolCallsReceived {
                round,
                count: calls.len(),
            });
            let round_outcome = if self.config.parallel_tools {
                self.run_tools_parallel(&calls).await
            } else {
                self.run_tools_sequential(&calls).await
            };
            match round_outcome {
                ToolRound::Completed => {}
                ToolRound::Failed => {
                    response.status = ResponseStatus::ToolFailed;
                    response.error = Some(TOOL_FAILURE_ERROR.to_string());
                    return response;
                }
                ToolRound::Cancelled => return self.cancelled(response),
            }
        }

        self.emit(AgentEvent::IterationLimitReached { max_rounds });
        info!("No final answer after {max_rounds} round(s)");
        response.error = Some(format!(
            "reached the iteration limit ({max_rounds}) without a final answer"
        ));
        response
    }

    /// Single streamed request without the tool loop.
    ///
    /// Text deltas go to `on_chunk` as they arrive, possibly from a runtime
    /// worker thread other than the caller's. `on_complete` runs once with
    /// the final response, which is also returned. No tool schema is sent.
    /// The user turn and the reply are appended to history only on success.
    pub async fn process_stream<C, D>(
        &mut self,
        user_message: impl Into<String>,
        on_chunk: C,
        on_complete: D,
    ) -> AgentResponse
    where
        C: Fn(&str) + Send + Sync,
        D: FnOnce(&AgentResponse),
    {
        let user = Message::user(user_message);
        let mut response = AgentResponse::new(ResponseStatus::Completed);

        if self.is_cancelled() {
            let response = self.cancelled(response);
            on_complete(&response);
            return response;
        }

        let mut history = self.history.clone();
        history.push(user.clone());
        let optimized = self.optimizer.optimize_history(&history, false);
        let system_prompt = self.system_prompt(&[]);
        let request = ChatRequest::new(build_messages(system_prompt.as_deref(), optimized.messages), Vec::new())
            .with_cache_prompt(self.optimizer.config().enable_prompt_caching);

        let handler = self.event_handler;
        let forward = |delta: &str| {
            on_chunk(delta);
            handler.on_event(&AgentEvent::TextDelta(delta));
        };
        let outcome =
            cancellable(self.cancel.as_ref(), self.provider.chat_stream(&request, &forward)).await;
        response.iterations = 1;

        let response = match outcome {
            None => self.cancelled(response),
            Some(Err(e)) => {
                let error = e.to_string();
                self.emit(AgentEvent::ProviderFailed { error: &error });
                response.status = ResponseStatus::ProviderFailed;
                response.error = Some(error);
                response
            }
            Some(Ok(chat)) => {
                self.history.push(user);
                if chat.has_tool_calls() {
                    debug!(
                        "Ignoring {} tool call(s) in a streamed reply",
                        chat.tool_calls.len()
                    );
                }
                let chat = ChatResponse {
                    tool_calls: Vec::new(),
                    ..chat
                };
                self.record_reply(chat, &mut response);
                self.emit(AgentEvent::Finished);
                response
            }
        };
        on_complete(&response);
        response
    }

    // ── Round steps ────────────────────────────────────────────────

    /// Budget check, compression, system prompt, and tool schema for one
    /// round.
    fn prepare_request(&self, round: u32, descriptions: &[ToolDescription]) -> ChatRequest {
        let usage = self.budget.usage();
        self.emit(AgentEvent::RoundStart {
            round,
            max_rounds: self.config.max_iterations,
            usage: &usage,
        });

        let tools: Vec<ToolDefinition> = tool_definitions(descriptions);
        let over_budget = match self.budget.preflight(&self.history, &tools) {
            Some(warning) => {
                self.emit(AgentEvent::BudgetWarning(&warning));
                true
            }
            None => false,
        };

        let optimized = self.optimizer.optimize_history(&self.history, over_budget);
        if optimized.compressed {
            self.emit(AgentEvent::Compressed {
                tokens_before: optimized.tokens_before,
                tokens_after: optimized.tokens_after,
                messages_before: self.history.len(),
                messages_after: optimized.messages.len(),
            });
        }

        let system_prompt = self.system_prompt(descriptions);
        ChatRequest::new(build_messages(system_prompt.as_deref(), optimized.messages), tools)
            .with_cache_prompt(self.optimizer.config().enable_prompt_caching)
    }

    fn system_prompt(&self, descriptions: &[ToolDescription]) -> Option<String> {
        let builder = PromptBuilder::new(self.config.system_prompt.clone().unwrap_or_default());
        let builder = if self.config.tool_guide {
            builder.tool_guide(descriptions)
        } else {
            builder
        };
        if builder.is_empty() {
            None
        } else {
            Some(builder.build())
        }
    }

    /// Account for the reply, append it to history, and hand back its tool
    /// calls.
    fn record_reply(&mut self, chat: ChatResponse, response: &mut AgentResponse) -> Vec<ToolCall> {
        self.budget.record_response(chat.input_tokens, chat.output_tokens);
        response.total_input_tokens += chat.input_tokens;
        response.total_output_tokens += chat.output_tokens;
        self.emit(AgentEvent::TokenUsage {
            input_tokens: chat.input_tokens,
            output_tokens: chat.output_tokens,
        });

        if !chat.content.is_empty() {
            self.emit(AgentEvent::Text(&chat.content));
            response.content.clone_from(&chat.content);
        }
        self.history
            .push(Message::assistant(chat.content, chat.tool_calls.clone()));
        chat.tool_calls
    }

    // ── Tool execution ─────────────────────────────────────────────

    async fn run_tools_sequential(&mut self, calls: &[ToolCall]) -> ToolRound {
        let tools = self.tools;
        for call in calls {
            let result = match self.approve(call) {
                Some(denied) => denied,
                None => match cancellable(self.cancel.as_ref(), tools.execute(&call.name, &call.arguments)).await {
                    Some(result) => result,
                    None => return ToolRound::Cancelled,
                },
            };
            if !self.record_tool_result(call, result) {
                return ToolRound::Failed;
            }
        }
        ToolRound::Completed
    }

    /// Run all calls concurrently, then append results in model order up to
    /// the first failure.
    async fn run_tools_parallel(&mut self, calls: &[ToolCall]) -> ToolRound {
        let tools = self.tools;
        let denied: Vec<Option<ToolResult>> = calls.iter().map(|call| self.approve(call)).collect();
        let pending = calls.iter().zip(denied).map(|(call, denied)| async move {
            match denied {
                Some(result) => result,
                None => tools.execute(&call.name, &call.arguments).await,
            }
        });
        let Some(results) = cancellable(self.cancel.as_ref(), join_all(pending)).await else {
            return ToolRound::Cancelled;
        };
        for (call, result) in calls.iter().zip(results) {
            if !self.record_tool_result(call, result) {
                return ToolRound::Failed;
            }
        }
        ToolRound::Completed
    }

    /// Announce a call and give handlers a chance to block it. Returns the
    /// failed result for a denied call.
    fn approve(&self, call: &ToolCall) -> Option<ToolResult> {
        let response = self.emit(AgentEvent::ToolExecuting {
            name: &call.name,
            call_id: &call.id,
            arguments: &call.arguments,
        });
        match response {
            Some(EventResponse::Deny(reason)) => Some(ToolResult::failure(format!(
                "tool '{}' was denied: {reason}",
                call.name
            ))),
            _ => None,
        }
    }

    /// Append the TOOL message for one call. Returns whether it succeeded.
    fn record_tool_result(&mut self, call: &ToolCall, result: ToolResult) -> bool {
        let content = self
            .optimizer
            .truncate_tool_result(result.model_text().to_string());
        self.emit(AgentEvent::ToolResult {
            name: &call.name,
            call_id: &call.id,
            result: &content,
            success: result.success,
        });
        let message = if result.success {
            Message::tool_result(call.id.clone(), content)
        } else {
            Message::tool_error(call.id.clone(), content)
        };
        self.history.push(message);
        result.success
    }

    // ── Cancellation ───────────────────────────────────────────────

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn cancelled(&self, mut response: AgentResponse) -> AgentResponse {
        self.emit(AgentEvent::Cancelled);
        response.status = ResponseStatus::Cancelled;
        response.error = Some("cancelled".to_string());
        response
    }
}

enum ToolRound {
    Completed,
    Failed,
    Cancelled,
}

/// Await `fut` unless `token` fires first.
async fn cancellable<F: Future>(token: Option<&CancellationToken>, fut: F) -> Option<F::Output> {
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            out = fut => Some(out),
        },
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;
    use crate::context::TokenOptimizationConfig;
    use crate::provider::{ProviderError, ProviderFuture};
    use crate::tools::{FnTool, ParamType, ToolParameter, ToolRegistry};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<ChatResponse>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<ChatResponse>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn chat<'a>(
            &'a self,
            request: &'a ChatRequest,
        ) -> ProviderFuture<'a, Result<ChatResponse, ProviderError>> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self.replies.lock().unwrap().pop_front();
            Box::pin(async move { reply.ok_or_else(|| ProviderError::Api("script exhausted".into())) })
        }
    }

    fn echo_registry() -> ToolRegistry {
        ToolRegistry::new().with(FnTool::new(
            ToolDescription::new("echo", "Echo text back")
                .param(ToolParameter::required("text", ParamType::String, "Text")),
            |args| async move { Ok(args.str("text")?.to_string()) },
        ))
    }

    #[tokio::test]
    async fn system_prompt_and_tools_reach_the_provider() {
        let provider = Scripted::new(vec![ChatResponse::text("done")]);
        let tools = echo_registry();
        let config = AgentConfig::new()
            .with_system_prompt("Be brief.")
            .with_tool_guide(true);
        let mut agent = Agent::new(&provider, &tools, config);
        let response = agent.process("hi").await;
        assert!(response.success());

        let requests = provider.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert!(request.messages[0].content.starts_with("Be brief."));
        assert!(request.messages[0].content.contains("- `echo`: Echo text back"));
        assert_eq!(request.messages[1], Message::user("hi"));
        assert_eq!(request.tools.len(), 1);
        assert!(request.cache_prompt);
        // The system prompt is never stored.
        assert_eq!(agent.history().len(), 2);
    }

    #[tokio::test]
    async fn long_history_is_compressed_on_the_wire_only() {
        let provider = Scripted::new(vec![ChatResponse::text("ok")]);
        let tools = ToolRegistry::new();
        let optimization = TokenOptimizationConfig::default().with_compression_threshold(50);
        let history: Vec<Message> = (0..30)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i} {}", "x".repeat(40)))
                } else {
                    Message::assistant_text(format!("answer {i} {}", "y".repeat(40)))
                }
            })
            .collect();
        let mut agent = Agent::new(&provider, &tools, AgentConfig::new().with_optimization(optimization))
            .with_history(history);
        agent.process("next").await;

        let sent = provider.requests.lock().unwrap()[0].messages.len();
        assert!(sent < 31, "sent {sent} messages");
        assert_eq!(agent.history().len(), 32);
    }

    #[tokio::test]
    async fn usage_flows_into_budget_and_response() {
        let provider = Scripted::new(vec![
            ChatResponse::text("")
                .with_tool_calls(vec![ToolCall::new("c1", "echo", json!({"text": "a"}))])
                .with_usage(100, 10),
            ChatResponse::text("final").with_usage(150, 20),
        ]);
        let tools = echo_registry();
        let mut agent = Agent::new(&provider, &tools, AgentConfig::new());
        let response = agent.process("go").await;
        assert_eq!(response.total_input_tokens, 250);
        assert_eq!(response.total_output_tokens, 30);
        assert_eq!(response.iterations, 2);
        assert_eq!(agent.budget().current_usage(), 280);
        assert_eq!(agent.budget().stats().requests, 2);

        agent.reset();
        assert!(agent.history().is_empty());
        assert_eq!(agent.budget().current_usage(), 0);
    }

    #[tokio::test]
    async fn denied_tool_fails_the_round() {
        let provider = Scripted::new(vec![ChatResponse::text("").with_tool_calls(vec![
            ToolCall::new("c1", "echo", json!({"text": "a"})),
        ])]);
        let tools = echo_registry();
        let handler = crate::agent::FnEventHandler::new(|event| match event {
            AgentEvent::ToolExecuting { .. } => Some(EventResponse::Deny("not now".into())),
            _ => None,
        });
        let mut agent = Agent::new(&provider, &tools, AgentConfig::new()).with_event_handler(&handler);
        let response = agent.process("go").await;
        assert_eq!(response.status, ResponseStatus::ToolFailed);
        let last = agent.history().last().unwrap();
        assert!(last.is_error);
        assert!(last.content.contains("not now"));
    }

    #[tokio::test]
    async fn long_tool_output_is_truncated() {
        let provider = Scripted::new(vec![
            ChatResponse::text("").with_tool_calls(vec![ToolCall::new(
                "c1",
                "echo",
                json!({"text": "z".repeat(50)}),
            )]),
            ChatResponse::text("ok"),
        ]);
        let tools = echo_registry();
        let optimization = TokenOptimizationConfig::default().with_tool_result_limit(Some(10));
        let mut agent = Agent::new(&provider, &tools, AgentConfig::new().with_optimization(optimization));
        agent.process("go").await;
        let tool_message = &agent.history()[2];
        assert_eq!(tool_message.role, MessageRole::Tool);
        assert!(tool_message.content.starts_with("zzzzzzzzzz\n\n[truncated: 50 chars total]"));
    }
}
