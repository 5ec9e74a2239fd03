//! Token accounting and history compression.
//!
//! 1. **[`estimator`]**: [`TokenEstimator`] approximates token counts with a
//!    mixed-script heuristic. Results are memoized in an [`lru::ArenaLru`]
//!    shared behind a mutex.
//!
//! 2. **[`compressor`]**: [`HistoryCompressor`] builds a three-tier outbound
//!    copy of the history: old summary, simplified middle, verbatim recent.
//!
//! 3. **[`budget`]**: [`TokenBudget`] tracks cumulative usage against a
//!    ceiling and reports [`WarningLevel`]s.
//!
//! 4. **[`optimizer`]**: [`TokenOptimizer`] ties the above to a
//!    [`TokenOptimizationConfig`] for the [`Agent`](crate::agent::Agent) loop.

pub mod budget;
pub mod compressor;
pub mod estimator;
pub mod lru;
pub mod optimizer;

pub use budget::{BudgetUsage, BudgetWarning, TokenBudget, TokenStats, WarningLevel};
pub use compressor::{CompressionLayers, CompressionTiers, HistoryCompressor};
pub use estimator::{TOOL_CALL_TOKEN_SURCHARGE, TokenEstimator, estimate_text};
pub use optimizer::{ConfigError, OptimizedHistory, TokenOptimizationConfig, TokenOptimizer};
