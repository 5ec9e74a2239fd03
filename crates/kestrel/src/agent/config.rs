//! Configuration for the [`Agent`](super::harness::Agent).
//!
//! # Examples
//!
//! ```
//! use kestrel::agent::AgentConfig;
//! use kestrel::context::TokenOptimizationConfig;
//!
//! let config = AgentConfig::new()
//!     .with_system_prompt("You are a careful assistant.")
//!     .with_max_iterations(20)
//!     .with_optimization(TokenOptimizationConfig::default().with_compression_threshold(4_000))
//!     .with_parallel_tools(true);
//! assert_eq!(config.max_iterations, 20);
//! ```

use crate::context::{ConfigError, TokenOptimizationConfig};
use serde::Deserialize;

/// Default provider round-trip cap per `process()` call.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Settings for one conversation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Provider round-trips allowed per `process()` call.
    pub max_iterations: u32,
    /// Prepended as a SYSTEM message to every request. Never stored in
    /// history, so compression never touches it.
    pub system_prompt: Option<String>,
    pub optimization: TokenOptimizationConfig,
    /// Run the tool calls of one round concurrently. TOOL messages are
    /// still appended in model order.
    pub parallel_tools: bool,
    /// Append a "## Tools" section listing every tool to the system prompt.
    pub tool_guide: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            system_prompt: None,
            optimization: TokenOptimizationConfig::default(),
            parallel_tools: false,
            tool_guide: false,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_optimization(mut self, optimization: TokenOptimizationConfig) -> Self {
        self.optimization = optimization;
        self
    }

    pub fn with_parallel_tools(mut self, enabled: bool) -> Self {
        self.parallel_tools = enabled;
        self
    }

    pub fn with_tool_guide(mut self, enabled: bool) -> Self {
        self.tool_guide = enabled;
        self
    }

    /// Reject a zero iteration cap and any invalid optimization option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError {
                field: "max_iterations",
            });
        }
        self.optimization.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AgentConfig::new();
        assert_eq!(config.max_iterations, 10);
        assert!(config.system_prompt.is_none());
        assert!(!config.parallel_tools);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_iterations_rejected() {
        let err = AgentConfig::new().with_max_iterations(0).validate().unwrap_err();
        assert_eq!(err.field, "max_iterations");
    }

    #[test]
    fn deserializes_partial_json() {
        let config: AgentConfig = serde_json::from_str(
            r#"{"max_iterations": 3, "optimization": {"compression_threshold": 500}}"#,
        )
        .unwrap();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.optimization.compression_threshold, 500);
        assert!(config.optimization.enable_compression);
    }
}
