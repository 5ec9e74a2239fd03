//! Agent runtime: the [`Agent`] loop and its supporting modules.
//!
//! - [`harness::Agent`]: the tool-use loop. Start here.
//! - [`config::AgentConfig`]: iteration cap, system prompt, token
//!   optimization, and tool execution settings.
//! - [`events`]: [`EventHandler`] trait and [`AgentEvent`] enum for
//!   observing the loop, plus the [`AgentResponse`] every call returns.
//! - [`prompt`]: [`PromptBuilder`] and the tool-schema conversion.
//! - [`transcript`]: save and restore a conversation history.

pub mod config;
pub mod events;
pub mod harness;
pub mod prompt;
pub mod transcript;

pub use config::{AgentConfig, DEFAULT_MAX_ITERATIONS};
pub use events::{
    AgentEvent, AgentResponse, CompositeEventHandler, EventHandler, EventResponse,
    FnEventHandler, LoggingHandler, NoopHandler, ResponseStatus,
};
pub use harness::{Agent, TOOL_FAILURE_ERROR};
pub use prompt::{PromptBuilder, build_messages, tool_definitions};
pub use transcript::TranscriptError;
