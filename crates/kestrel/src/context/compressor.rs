//! Three-tier history compression.
//!
//! Rewrites a conversation into a smaller outbound copy shaped as:
//! 1. **Old summary**: at most one synthetic SYSTEM message standing in for
//!    everything older than the two windows below.
//! 2. **Middle window**: the next-older messages, each simplified on its own.
//!    USER and TOOL messages pass through untouched, since a TOOL message's
//!    `tool_call_id` must survive for the provider to accept the request.
//! 3. **Recent window**: the last N messages, verbatim.
//!
//! The canonical history is never touched; compression always works on a
//! derived copy that is discarded once the request is built.

use super::estimator::TokenEstimator;
use crate::{Message, MessageRole};
use std::sync::Arc;

/// Default size of the verbatim recent window.
pub const DEFAULT_RECENT_MESSAGES: usize = 5;

/// Default size of the simplified middle window.
pub const DEFAULT_MIDDLE_MESSAGES: usize = 10;

/// Assistant text in the middle window is cut to this many characters.
pub const MIDDLE_ASSISTANT_MAX_CHARS: usize = 100;

/// The first user request quoted in the old summary is cut to this many characters.
const SUMMARY_QUOTE_MAX_CHARS: usize = 200;

const ELLIPSIS: &str = "...";

/// Window sizes for the recent and middle tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionTiers {
    pub recent: usize,
    pub middle: usize,
}

impl Default for CompressionTiers {
    fn default() -> Self {
        Self {
            recent: DEFAULT_RECENT_MESSAGES,
            middle: DEFAULT_MIDDLE_MESSAGES,
        }
    }
}

impl CompressionTiers {
    /// Split `total` messages into `(old, middle, recent)` counts.
    pub fn split(&self, total: usize) -> (usize, usize, usize) {
        let recent = self.recent.min(total);
        let middle = self.middle.min(total - recent);
        (total - recent - middle, middle, recent)
    }
}

/// Layered view of a history, built fresh for each compressed request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressionLayers {
    pub old_summary: Option<Message>,
    pub middle: Vec<Message>,
    pub recent: Vec<Message>,
    /// Number of messages folded into `old_summary`.
    pub summarized: usize,
}

impl CompressionLayers {
    pub fn len(&self) -> usize {
        usize::from(self.old_summary.is_some()) + self.middle.len() + self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into `old_summary ++ middle ++ recent`.
    pub fn into_messages(self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.old_summary);
        out.extend(self.middle);
        out.extend(self.recent);
        out
    }
}

/// Builds compressed outbound copies of a conversation history.
#[derive(Debug, Clone)]
pub struct HistoryCompressor {
    tiers: CompressionTiers,
    estimator: Arc<TokenEstimator>,
}

impl HistoryCompressor {
    pub fn new(estimator: Arc<TokenEstimator>) -> Self {
        Self {
            tiers: CompressionTiers::default(),
            estimator,
        }
    }

    /// Override the recent/middle window sizes.
    pub fn with_tiers(mut self, recent: usize, middle: usize) -> Self {
        self.tiers = CompressionTiers { recent, middle };
        self
    }

    pub fn tiers(&self) -> CompressionTiers {
        self.tiers
    }

    /// Split `history` into its three tiers regardless of size.
    pub fn layers(&self, history: &[Message]) -> CompressionLayers {
        let (old, middle, _) = self.tiers.split(history.len());
        let (older, rest) = history.split_at(old);
        let (middle_slice, recent_slice) = rest.split_at(middle);

        CompressionLayers {
            old_summary: (!older.is_empty()).then(|| summarize(older)),
            middle: middle_slice.iter().map(simplify).collect(),
            recent: recent_slice.to_vec(),
            summarized: older.len(),
        }
    }

    /// Compress `history` to fit under `target_tokens` where possible.
    ///
    /// Returns `history` unchanged when it already fits or when it is no
    /// longer than the recent window. Otherwise returns the layered form. If
    /// the layered form is not smaller than the input (a middle window full
    /// of short user turns, say) and the middle window holds no TOOL
    /// messages, the middle is folded into the summary as well.
    ///
    /// When nothing is older than the middle window and the middle is only
    /// short USER turns, neither form is smaller and the input comes back
    /// unchanged even though it is over target.
    pub fn compress(&self, history: &[Message], target_tokens: usize) -> Vec<Message> {
        let original = self.estimator.estimate_messages(history);
        if original <= target_tokens || history.len() <= self.tiers.recent {
            return history.to_vec();
        }

        let layers = self.layers(history);
        let middle_has_tool = layers.middle.iter().any(|m| m.role == MessageRole::Tool);
        let layered = layers.into_messages();
        if self.estimator.estimate_messages(&layered) < original || middle_has_tool {
            return layered;
        }

        let (_, _, recent) = self.tiers.split(history.len());
        let split = history.len() - recent;
        let mut folded = Vec::with_capacity(recent + 1);
        folded.push(summarize(&history[..split]));
        folded.extend_from_slice(&history[split..]);
        if self.estimator.estimate_messages(&folded) < self.estimator.estimate_messages(&layered) {
            folded
        } else {
            layered
        }
    }
}

/// Simplify one middle-window message.
fn simplify(message: &Message) -> Message {
    match message.role {
        MessageRole::Assistant if message.has_tool_calls() => {
            let n = message.tool_calls.len();
            Message::assistant_text(format!("[Called {n} tool(s)]"))
        }
        MessageRole::Assistant => {
            Message::assistant_text(truncate_chars(&message.content, MIDDLE_ASSISTANT_MAX_CHARS))
        }
        MessageRole::System | MessageRole::User | MessageRole::Tool => message.clone(),
    }
}

/// Build the single SYSTEM message standing in for `older`.
fn summarize(older: &[Message]) -> Message {
    let mut text = format!(
        "[Conversation summary] {} earlier message(s) were compressed.",
        older.len()
    );
    if let Some(first) = older.iter().find(|m| m.role == MessageRole::User) {
        text.push_str(" The conversation began with the user asking: \"");
        text.push_str(&truncate_chars(&first.content, SUMMARY_QUOTE_MAX_CHARS));
        text.push('"');
    }
    Message::system(text)
}

/// Keep at most `max_chars` characters, appending an ellipsis when cut.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            #[allow(clippy::string_slice)] // byte_idx comes from char_indices
            let head = &text[..byte_idx];
            let mut out = String::with_capacity(byte_idx + ELLIPSIS.len());
            out.push_str(head);
            out.push_str(ELLIPSIS);
            out
        }
        None => text.to_string(),
    }
}
