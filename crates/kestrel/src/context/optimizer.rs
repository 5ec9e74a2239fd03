//! Token optimization settings and the façade the agent loop talks to.
//!
//! [`TokenOptimizer`] bundles a shared [`TokenEstimator`], a
//! [`HistoryCompressor`] sized from the config, and tool-result truncation.

use super::compressor::{DEFAULT_MIDDLE_MESSAGES, DEFAULT_RECENT_MESSAGES, HistoryCompressor};
use super::estimator::TokenEstimator;
use crate::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A config value that must be positive was zero.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{field}` must be greater than zero")]
pub struct ConfigError {
    pub field: &'static str,
}

/// Settings for estimation caching, compression, and tool-result sizing.
///
/// Every field has a default, so partial TOML/JSON documents deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenOptimizationConfig {
    pub enable_compression: bool,
    /// Estimated history tokens above which compression kicks in.
    pub compression_threshold: usize,
    pub enable_prompt_caching: bool,
    pub compress_tool_results: bool,
    /// Tool output longer than this many characters is truncated.
    pub max_tool_result_length: usize,
    /// Overall token ceiling handed to the [`TokenBudget`](super::TokenBudget).
    pub target_budget: usize,
    pub enable_token_cache: bool,
    pub max_cache_size: usize,
    pub recent_messages: usize,
    pub middle_messages: usize,
}

impl Default for TokenOptimizationConfig {
    fn default() -> Self {
        Self {
            enable_compression: true,
            compression_threshold: 8_000,
            enable_prompt_caching: true,
            compress_tool_results: true,
            max_tool_result_length: 4_000,
            target_budget: 100_000,
            enable_token_cache: true,
            max_cache_size: 1_000,
            recent_messages: DEFAULT_RECENT_MESSAGES,
            middle_messages: DEFAULT_MIDDLE_MESSAGES,
        }
    }
}

impl TokenOptimizationConfig {
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    pub fn with_compression_threshold(mut self, tokens: usize) -> Self {
        self.compression_threshold = tokens;
        self
    }

    pub fn with_prompt_caching(mut self, enabled: bool) -> Self {
        self.enable_prompt_caching = enabled;
        self
    }

    /// Truncate tool output above `max_chars`; `None` disables truncation.
    pub fn with_tool_result_limit(mut self, max_chars: Option<usize>) -> Self {
        match max_chars {
            Some(n) => {
                self.compress_tool_results = true;
                self.max_tool_result_length = n;
            }
            None => self.compress_tool_results = false,
        }
        self
    }

    pub fn with_target_budget(mut self, tokens: usize) -> Self {
        self.target_budget = tokens;
        self
    }

    /// Configure the estimate cache; `None` disables it.
    pub fn with_token_cache(mut self, max_entries: Option<usize>) -> Self {
        match max_entries {
            Some(n) => {
                self.enable_token_cache = true;
                self.max_cache_size = n;
            }
            None => self.enable_token_cache = false,
        }
        self
    }

    pub fn with_tiers(mut self, recent: usize, middle: usize) -> Self {
        self.recent_messages = recent;
        self.middle_messages = middle;
        self
    }

    /// Reject zero values for options that must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("compression_threshold", self.compression_threshold),
            ("max_tool_result_length", self.max_tool_result_length),
            ("target_budget", self.target_budget),
            ("max_cache_size", self.max_cache_size),
        ];
        match checks.iter().find(|(_, v)| *v == 0) {
            Some(&(field, _)) => Err(ConfigError { field }),
            None => Ok(()),
        }
    }
}

/// Result of [`TokenOptimizer::optimize_history`].
#[derive(Debug, Clone)]
pub struct OptimizedHistory {
    pub messages: Vec<Message>,
    pub compressed: bool,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Compression trigger, compressor, and tool-result truncation in one place.
#[derive(Debug, Clone)]
pub struct TokenOptimizer {
    config: TokenOptimizationConfig,
    estimator: Arc<TokenEstimator>,
    compressor: HistoryCompressor,
}

impl TokenOptimizer {
    /// Build with a private estimator sized from `config`.
    pub fn new(config: TokenOptimizationConfig) -> Self {
        let estimator = Arc::new(TokenEstimator::from_config(&config));
        Self::with_estimator(config, estimator)
    }

    /// Build around an estimator shared with other components.
    pub fn with_estimator(config: TokenOptimizationConfig, estimator: Arc<TokenEstimator>) -> Self {
        let compressor = HistoryCompressor::new(estimator.clone())
            .with_tiers(config.recent_messages, config.middle_messages);
        Self {
            config,
            estimator,
            compressor,
        }
    }

    pub fn config(&self) -> &TokenOptimizationConfig {
        &self.config
    }

    pub fn estimator(&self) -> &Arc<TokenEstimator> {
        &self.estimator
    }

    pub fn compressor(&self) -> &HistoryCompressor {
        &self.compressor
    }

    /// Whether `history` is over the compression threshold (and compression is on).
    pub fn should_compress(&self, history: &[Message]) -> bool {
        self.config.enable_compression
            && self.estimator.estimate_messages(history) > self.config.compression_threshold
    }

    /// Compress toward `target_tokens`.
    pub fn compress_history(&self, history: &[Message], target_tokens: usize) -> Vec<Message> {
        self.compressor.compress(history, target_tokens)
    }

    /// Produce the outbound copy of `history`. Compresses toward the
    /// threshold when over it, or unconditionally when `force` is set.
    /// Never compresses when compression is disabled.
    pub fn optimize_history(&self, history: &[Message], force: bool) -> OptimizedHistory {
        let tokens_before = self.estimator.estimate_messages(history);
        let over = tokens_before > self.config.compression_threshold;
        if !self.config.enable_compression || !(over || force) {
            return OptimizedHistory {
                messages: history.to_vec(),
                compressed: false,
                tokens_before,
                tokens_after: tokens_before,
            };
        }

        // A forced pass must get below the current size even when under threshold.
        let target = if over {
            self.config.compression_threshold
        } else {
            tokens_before.saturating_sub(1)
        };
        let messages = self.compressor.compress(history, target);
        let tokens_after = self.estimator.estimate_messages(&messages);
        OptimizedHistory {
            compressed: messages.len() != history.len() || tokens_after != tokens_before,
            messages,
            tokens_before,
            tokens_after,
        }
    }

    /// Cut tool output to the configured length, noting the original size.
    pub fn truncate_tool_result(&self, content: String) -> String {
        if !self.config.compress_tool_results {
            return content;
        }
        let max = self.config.max_tool_result_length;
        match content.char_indices().nth(max) {
            Some((byte_idx, _)) => {
                let total = content.chars().count();
                let mut out = content;
                out.truncate(byte_idx);
                out.push_str(&format!("\n\n[truncated: {total} chars total]"));
                out
            }
            None => content,
        }
    }
}

impl Default for TokenOptimizer {
    fn default() -> Self {
        Self::new(TokenOptimizationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TokenOptimizationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.compression_threshold, 8_000);
        assert_eq!(config.recent_messages, 5);
        assert_eq!(config.middle_messages, 10);
    }

    #[test]
    fn validate_names_zero_field() {
        let config = TokenOptimizationConfig::default().with_target_budget(0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "target_budget");
        assert_eq!(err.to_string(), "`target_budget` must be greater than zero");
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: TokenOptimizationConfig =
            serde_json::from_str(r#"{"compression_threshold": 123, "enable_token_cache": false}"#)
                .unwrap();
        assert_eq!(config.compression_threshold, 123);
        assert!(!config.enable_token_cache);
        assert!(config.enable_compression);
        assert_eq!(config.max_cache_size, 1_000);
    }

    #[test]
    fn estimator_follows_cache_setting() {
        let cached = TokenOptimizer::default();
        assert!(cached.estimator().is_caching());
        let uncached =
            TokenOptimizer::new(TokenOptimizationConfig::default().with_token_cache(None));
        assert!(!uncached.estimator().is_caching());
    }

    #[test]
    fn should_compress_respects_threshold_and_switch() {
        let history = vec![Message::user("word ".repeat(100))];
        let on = TokenOptimizer::new(TokenOptimizationConfig::default().with_compression_threshold(10));
        assert!(on.should_compress(&history));
        let off = TokenOptimizer::new(
            TokenOptimizationConfig::default()
                .with_compression_threshold(10)
                .with_compression(false),
        );
        assert!(!off.should_compress(&history));
        assert!(!off.optimize_history(&history, true).compressed);
    }

    #[test]
    fn optimize_under_threshold_is_identity() {
        let optimizer = TokenOptimizer::default();
        let history = vec![Message::user("hello"), Message::assistant_text("hi")];
        let out = optimizer.optimize_history(&history, false);
        assert!(!out.compressed);
        assert_eq!(out.messages, history);
    }

    #[test]
    fn forced_optimize_shrinks() {
        let optimizer = TokenOptimizer::default();
        let history: Vec<Message> = (0..20)
            .map(|i| Message::assistant_text(format!("{i} {}", "text ".repeat(40))))
            .collect();
        let out = optimizer.optimize_history(&history, true);
        assert!(out.compressed);
        assert!(out.tokens_after < out.tokens_before);
        assert_eq!(out.messages.len(), 16);
    }

    #[test]
    fn tool_result_truncation() {
        let optimizer = TokenOptimizer::new(
            TokenOptimizationConfig::default().with_tool_result_limit(Some(10)),
        );
        let out = optimizer.truncate_tool_result("a".repeat(25));
        assert!(out.starts_with(&"a".repeat(10)));
        assert!(out.ends_with("[truncated: 25 chars total]"));
        assert_eq!(optimizer.truncate_tool_result("short".into()), "short");

        let off = TokenOptimizer::new(TokenOptimizationConfig::default().with_tool_result_limit(None));
        assert_eq!(off.truncate_tool_result("a".repeat(25)), "a".repeat(25));
    }
}
