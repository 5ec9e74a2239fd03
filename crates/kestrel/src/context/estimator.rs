//! Heuristic token estimation for text and message lists.
//!
//! Counts are approximations meant for planning (compression triggers,
//! budget checks), never for billing. Characters are split into three
//! classes with different densities:
//!
//! | Class | Chars per token |
//! |-------|-----------------|
//! | Non-ASCII (CJK, accented, emoji) | 1.5 |
//! | ASCII non-whitespace | 4 |
//! | ASCII whitespace | 10 |
//!
//! Each class is rounded up separately and the three are summed, so any
//! non-empty string costs at least one token and appending characters never
//! lowers the estimate.

use super::lru::ArenaLru;
use crate::{Message, MessageRole};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Flat surcharge for every tool call carried by an assistant message.
pub const TOOL_CALL_TOKEN_SURCHARGE: usize = 50;

/// Strings up to this many bytes are cached under their literal text;
/// longer strings are keyed by a content digest.
const LITERAL_KEY_MAX_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Literal(String),
    Digest { hash: u64, len: usize },
}

impl CacheKey {
    fn for_text(text: &str) -> Self {
        if text.len() <= LITERAL_KEY_MAX_BYTES {
            CacheKey::Literal(text.to_string())
        } else {
            CacheKey::Digest {
                hash: fnv1a(text.as_bytes()),
                len: text.len(),
            }
        }
    }
}

/// Estimate tokens for `text` without touching any cache.
pub fn estimate_text(text: &str) -> usize {
    let (mut non_ascii, mut ascii, mut whitespace) = (0usize, 0usize, 0usize);
    for c in text.chars() {
        if !c.is_ascii() {
            non_ascii += 1;
        } else if c.is_ascii_whitespace() {
            whitespace += 1;
        } else {
            ascii += 1;
        }
    }
    // ceil(n / 1.5) == ceil(2n / 3)
    (non_ascii * 2).div_ceil(3) + ascii.div_ceil(4) + whitespace.div_ceil(10)
}

/// Token estimator with an optional shared LRU cache.
///
/// The cache is guarded by a mutex so one estimator can be shared (via
/// `Arc`) between several agents, the budget tracker, and a UI thread.
/// Results are identical with and without caching.
#[derive(Debug)]
pub struct TokenEstimator {
    cache: Option<Mutex<ArenaLru<CacheKey, usize>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TokenEstimator {
    /// An estimator that never caches.
    pub fn new() -> Self {
        Self {
            cache: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// An estimator that memoizes up to `max_entries` results.
    pub fn with_cache(max_entries: usize) -> Self {
        Self {
            cache: Some(Mutex::new(ArenaLru::new(max_entries))),
            ..Self::new()
        }
    }

    /// Build from the `enable_token_cache` / `max_cache_size` options.
    pub fn from_config(config: &super::TokenOptimizationConfig) -> Self {
        if config.enable_token_cache {
            Self::with_cache(config.max_cache_size)
        } else {
            Self::new()
        }
    }

    /// Estimate tokens for a piece of text. `estimate("") == 0`.
    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let Some(ref cache) = self.cache else {
            return estimate_text(text);
        };

        let key = CacheKey::for_text(text);
        {
            let mut lru = cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(&tokens) = lru.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return tokens;
            }
        }

        // Compute outside the lock; a racing thread may store the same value.
        let tokens = estimate_text(text);
        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut lru = cache.lock().unwrap_or_else(|e| e.into_inner());
        lru.put(key, tokens);
        tokens
    }

    /// Estimate a single message: its content plus the tool-call surcharge.
    pub fn estimate_message(&self, message: &Message) -> usize {
        let surcharge = if message.role == MessageRole::Assistant {
            message.tool_calls.len() * TOOL_CALL_TOKEN_SURCHARGE
        } else {
            0
        };
        self.estimate(&message.content) + surcharge
    }

    /// Estimate a whole message list.
    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Number of cached entries (0 when caching is disabled).
    pub fn cache_len(&self) -> usize {
        self.cache
            .as_ref()
            .map_or(0, |c| c.lock().unwrap_or_else(|e| e.into_inner()).len())
    }

    pub fn clear_cache(&self) {
        if let Some(ref cache) = self.cache {
            cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a over raw bytes.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use serde_json::json;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_text(""), 0);
        assert_eq!(TokenEstimator::new().estimate(""), 0);
        assert_eq!(TokenEstimator::with_cache(8).estimate(""), 0);
    }

    #[test]
    fn non_empty_is_at_least_one() {
        assert_eq!(estimate_text("a"), 1);
        assert_eq!(estimate_text(" "), 1);
        assert_eq!(estimate_text("é"), 1);
    }

    #[test]
    fn ascii_rounds_up_per_four_chars() {
        assert_eq!(estimate_text("abcd"), 1);
        assert_eq!(estimate_text("abcde"), 2);
        assert_eq!(estimate_text("abcdefgh"), 2);
    }

    #[test]
    fn categories_are_rounded_separately() {
        // 8 ascii -> 2, 1 space -> 1
        assert_eq!(estimate_text("abcd efgh"), 3);
        // 2 CJK -> ceil(4/3) = 2, 3 CJK -> 2, 4 CJK -> ceil(8/3) = 3
        assert_eq!(estimate_text("你好"), 2);
        assert_eq!(estimate_text("你好吗"), 2);
        assert_eq!(estimate_text("你好你好"), 3);
        // 10 spaces -> 1, 11 spaces -> 2
        assert_eq!(estimate_text(&" ".repeat(10)), 1);
        assert_eq!(estimate_text(&" ".repeat(11)), 2);
    }

    #[test]
    fn cjk_is_denser_than_ascii() {
        let cjk = "中".repeat(60);
        let ascii = "a".repeat(60);
        assert!(estimate_text(&cjk) > estimate_text(&ascii));
    }

    #[test]
    fn prefix_monotonicity() {
        let text = "Hello, 世界! tokens  are\tfun: ñandú 🎉 end";
        let mut last = 0;
        let mut prefix = String::new();
        for c in text.chars() {
            prefix.push(c);
            let now = estimate_text(&prefix);
            assert!(now >= last, "estimate dropped at prefix {prefix:?}");
            last = now;
        }
    }

    #[test]
    fn cached_and_uncached_agree() {
        let plain = TokenEstimator::new();
        let cached = TokenEstimator::with_cache(4);
        let long = "x y z ".repeat(100);
        for text in ["short", "中文内容", long.as_str(), "short", long.as_str()] {
            assert_eq!(plain.estimate(text), cached.estimate(text));
        }
        assert_eq!(cached.hits(), 2);
        assert_eq!(cached.misses(), 3);
    }

    #[test]
    fn cache_is_bounded() {
        let est = TokenEstimator::with_cache(3);
        for i in 0..10 {
            est.estimate(&format!("text number {i}"));
        }
        assert_eq!(est.cache_len(), 3);
        est.clear_cache();
        assert_eq!(est.cache_len(), 0);
    }

    #[test]
    fn long_strings_use_digest_keys() {
        let long = "a".repeat(LITERAL_KEY_MAX_BYTES + 1);
        assert!(matches!(
            CacheKey::for_text(&long),
            CacheKey::Digest { len, .. } if len == LITERAL_KEY_MAX_BYTES + 1
        ));
        assert!(matches!(CacheKey::for_text("abc"), CacheKey::Literal(_)));
    }

    #[test]
    fn tool_calls_add_surcharge() {
        let est = TokenEstimator::new();
        let calls = vec![
            ToolCall::new("1", "ls", json!({})),
            ToolCall::new("2", "cat", json!({"path": "a"})),
        ];
        let msg = Message::assistant("abcd", calls);
        assert_eq!(est.estimate_message(&msg), 1 + 2 * TOOL_CALL_TOKEN_SURCHARGE);

        let messages = vec![Message::user("abcd"), msg, Message::tool_result("1", "abcd")];
        assert_eq!(
            est.estimate_messages(&messages),
            3 + 2 * TOOL_CALL_TOKEN_SURCHARGE
        );
    }

    #[test]
    fn shared_across_threads() {
        let est = std::sync::Arc::new(TokenEstimator::with_cache(16));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let est = est.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| est.estimate(&format!("thread {t} item {}", i % 5)))
                        .sum::<usize>()
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap() > 0);
        }
        assert!(est.cache_len() <= 16);
    }
}
