//! Token budget tracking: cumulative usage against a ceiling, warning
//! levels, and advisory pre-flight checks.
//!
//! The budget is advisory. [`TokenBudget::check_budget`] reports whether the
//! next request is likely to fit; the caller decides whether to compress,
//! proceed, or stop. State lives behind a mutex so one budget can be shared
//! between agents or read from a UI thread while a request is in flight.

use super::estimator::TokenEstimator;
use crate::{Message, ToolDefinition};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Fixed allowance for the system prompt when estimating the next request.
pub const SYSTEM_PROMPT_ALLOWANCE: usize = 500;

const LOW_THRESHOLD: f64 = 50.0;
const MEDIUM_THRESHOLD: f64 = 75.0;
const HIGH_THRESHOLD: f64 = 90.0;
const EXHAUSTED_THRESHOLD: f64 = 100.0;

/// Budget pressure, ordered from calm to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    /// Below 50%.
    None,
    /// 50% up to 75%.
    Low,
    /// 75% up to 90%.
    Medium,
    /// 90% and above.
    High,
}

impl WarningLevel {
    /// Classify a usage percentage. Lower bounds are inclusive.
    pub fn from_percentage(pct: f64) -> Self {
        if pct >= HIGH_THRESHOLD {
            WarningLevel::High
        } else if pct >= MEDIUM_THRESHOLD {
            WarningLevel::Medium
        } else if pct >= LOW_THRESHOLD {
            WarningLevel::Low
        } else {
            WarningLevel::None
        }
    }
}

impl std::fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WarningLevel::None => "none",
            WarningLevel::Low => "low",
            WarningLevel::Medium => "medium",
            WarningLevel::High => "high",
        };
        f.write_str(s)
    }
}

/// Provider-reported token counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Number of responses recorded.
    pub requests: u64,
}

impl TokenStats {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Payload handed to the warning callback when a pre-flight check fails.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetWarning {
    pub level: WarningLevel,
    /// Estimated cost of the request that did not fit.
    pub estimated_request_tokens: usize,
    pub remaining: usize,
    pub usage_pct: f64,
    pub suggestion: String,
}

type WarningCallback = Box<dyn Fn(&BudgetWarning) + Send + Sync>;

#[derive(Debug, Default)]
struct BudgetState {
    max_tokens: usize,
    current_usage: usize,
    stats: TokenStats,
}

/// Tracks cumulative token usage against a configured ceiling.
///
/// # Example
///
/// ```
/// use kestrel::context::{TokenBudget, TokenEstimator, WarningLevel};
/// use std::sync::Arc;
///
/// let budget = TokenBudget::new(1_000, Arc::new(TokenEstimator::new()));
/// budget.update_usage(960);
/// assert_eq!(budget.usage_percentage(), 96.0);
/// assert_eq!(budget.warning_level(), WarningLevel::High);
/// assert_eq!(budget.remaining_budget(), 40);
/// ```
pub struct TokenBudget {
    state: Mutex<BudgetState>,
    estimator: Arc<TokenEstimator>,
    on_warning: Option<WarningCallback>,
}

impl std::fmt::Debug for TokenBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TokenBudget")
            .field("max_tokens", &state.max_tokens)
            .field("current_usage", &state.current_usage)
            .field("stats", &state.stats)
            .field("on_warning", &self.on_warning.is_some())
            .finish()
    }
}

impl TokenBudget {
    pub fn new(max_tokens: usize, estimator: Arc<TokenEstimator>) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                max_tokens,
                ..BudgetState::default()
            }),
            estimator,
            on_warning: None,
        }
    }

    /// Register a callback fired whenever [`check_budget`](Self::check_budget) fails.
    pub fn with_warning_callback(
        mut self,
        callback: impl Fn(&BudgetWarning) + Send + Sync + 'static,
    ) -> Self {
        self.on_warning = Some(Box::new(callback));
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_budget(&self, max_tokens: usize) {
        self.lock().max_tokens = max_tokens;
    }

    pub fn max_tokens(&self) -> usize {
        self.lock().max_tokens
    }

    /// Add `delta` tokens to the running total. Usage only grows until
    /// [`reset_usage`](Self::reset_usage).
    pub fn update_usage(&self, delta: usize) {
        let mut state = self.lock();
        state.current_usage = state.current_usage.saturating_add(delta);
    }

    /// Record one provider response: updates the stats and adds
    /// `input + output` to the running total.
    pub fn record_response(&self, input_tokens: u64, output_tokens: u64) {
        let mut state = self.lock();
        state.stats.input_tokens += input_tokens;
        state.stats.output_tokens += output_tokens;
        state.stats.requests += 1;
        let delta = usize::try_from(input_tokens + output_tokens).unwrap_or(usize::MAX);
        state.current_usage = state.current_usage.saturating_add(delta);
    }

    /// Zero the running total and the stats. The ceiling is kept.
    pub fn reset_usage(&self) {
        let mut state = self.lock();
        state.current_usage = 0;
        state.stats = TokenStats::default();
    }

    pub fn current_usage(&self) -> usize {
        self.lock().current_usage
    }

    pub fn stats(&self) -> TokenStats {
        self.lock().stats
    }

    /// `max(0, max - current)`.
    pub fn remaining_budget(&self) -> usize {
        let state = self.lock();
        state.max_tokens.saturating_sub(state.current_usage)
    }

    /// `100 * current / max`, or 0 when the ceiling is 0.
    pub fn usage_percentage(&self) -> f64 {
        let state = self.lock();
        percentage(state.current_usage, state.max_tokens)
    }

    pub fn warning_level(&self) -> WarningLevel {
        WarningLevel::from_percentage(self.usage_percentage())
    }

    /// Human-readable advice keyed to the current usage.
    pub fn optimization_suggestion(&self) -> String {
        suggestion_for(self.usage_percentage()).to_string()
    }

    /// Estimated cost of the next request: history, system prompt
    /// allowance, and each tool definition's serialized schema.
    pub fn estimate_request(&self, messages: &[Message], tools: &[ToolDefinition]) -> usize {
        let history = self.estimator.estimate_messages(messages);
        let tool_cost: usize = tools
            .iter()
            .map(|t| {
                let schema = serde_json::to_string(t).unwrap_or_default();
                self.estimator.estimate(&schema)
            })
            .sum();
        history + SYSTEM_PROMPT_ALLOWANCE + tool_cost
    }

    /// Pre-flight check for the next request. Returns `false` and fires the
    /// warning callback when the estimate exceeds the remaining budget.
    pub fn check_budget(&self, messages: &[Message], tools: &[ToolDefinition]) -> bool {
        self.preflight(messages, tools).is_none()
    }

    /// Like [`check_budget`](Self::check_budget), but hands back the warning
    /// that was delivered to the callback.
    pub fn preflight(&self, messages: &[Message], tools: &[ToolDefinition]) -> Option<BudgetWarning> {
        let estimated = self.estimate_request(messages, tools);
        let (remaining, usage_pct) = {
            let state = self.lock();
            (
                state.max_tokens.saturating_sub(state.current_usage),
                percentage(state.current_usage, state.max_tokens),
            )
        };
        if estimated <= remaining {
            return None;
        }

        let warning = BudgetWarning {
            level: WarningLevel::from_percentage(usage_pct),
            estimated_request_tokens: estimated,
            remaining,
            usage_pct,
            suggestion: suggestion_for(usage_pct).to_string(),
        };
        tracing::debug!(
            estimated,
            remaining,
            level = %warning.level,
            "next request exceeds remaining token budget"
        );
        if let Some(ref callback) = self.on_warning {
            callback(&warning);
        }
        Some(warning)
    }

    /// Snapshot for logging and display.
    pub fn usage(&self) -> BudgetUsage {
        let state = self.lock();
        let usage_pct = percentage(state.current_usage, state.max_tokens);
        BudgetUsage {
            current_usage: state.current_usage,
            max_tokens: state.max_tokens,
            usage_pct,
            level: WarningLevel::from_percentage(usage_pct),
        }
    }
}

fn percentage(current: usize, max: usize) -> f64 {
    if max == 0 {
        0.0
    } else {
        100.0 * current as f64 / max as f64
    }
}

fn suggestion_for(pct: f64) -> &'static str {
    if pct >= EXHAUSTED_THRESHOLD {
        "Token budget exhausted. Start a new session or raise the budget before sending more requests."
    } else if pct >= HIGH_THRESHOLD {
        "Token budget nearly exhausted. Enable compression, shorten tool output, or wrap up the task."
    } else if pct >= MEDIUM_THRESHOLD {
        "Token usage is high. Consider compressing history and limiting tool result sizes."
    } else if pct >= LOW_THRESHOLD {
        "Half the token budget is used. Keep requests focused."
    } else {
        "Token usage is within budget."
    }
}

/// Snapshot of budget usage at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetUsage {
    pub current_usage: usize,
    pub max_tokens: usize,
    pub usage_pct: f64,
    pub level: WarningLevel,
}

impl BudgetUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "budget: {} / {} tokens ({:.0}%, warning {})",
            self.current_usage, self.max_tokens, self.usage_pct, self.level,
        )
    }
}
