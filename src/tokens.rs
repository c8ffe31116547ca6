//! Input token estimation.
//!
//! Uses an exact `cl100k_base` BPE count when the `tiktoken` feature is enabled
//! and the encoder loads, otherwise `ceil(chars / 4)`. Estimation never fails.

use crate::types::Message;

#[cfg(feature = "tiktoken")]
use once_cell::sync::OnceCell;
#[cfg(feature = "tiktoken")]
use std::sync::Arc;
#[cfg(feature = "tiktoken")]
use tiktoken_rs::CoreBPE;

/// Loaded once per process; `None` when the encoder failed to load.
#[cfg(feature = "tiktoken")]
static CL100K: OnceCell<Option<Arc<CoreBPE>>> = OnceCell::new();

/// Characters per token for the heuristic estimate.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Clone)]
enum Strategy {
    #[cfg(feature = "tiktoken")]
    Exact(Arc<CoreBPE>),
    Heuristic,
}

/// Approximates token counts for input text.
#[derive(Clone)]
pub struct TokenEstimator {
    strategy: Strategy,
}

impl TokenEstimator {
    /// Create an estimator, preferring the exact tokenizer when available.
    pub fn new() -> Self {
        #[cfg(feature = "tiktoken")]
        {
            if let Some(bpe) = cl100k() {
                return Self {
                    strategy: Strategy::Exact(bpe),
                };
            }
        }
        Self::heuristic()
    }

    /// Create an estimator that always uses the character heuristic.
    pub fn heuristic() -> Self {
        Self {
            strategy: Strategy::Heuristic,
        }
    }

    /// True when counts come from a real tokenizer.
    pub fn is_exact(&self) -> bool {
        !matches!(self.strategy, Strategy::Heuristic)
    }

    /// Estimated token count of `text`.
    pub fn estimate(&self, text: &str) -> u32 {
        let count = match &self.strategy {
            #[cfg(feature = "tiktoken")]
            Strategy::Exact(bpe) => bpe.encode_with_special_tokens(text).len(),
            Strategy::Heuristic => heuristic_count(text),
        };
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Sum of per-message content estimates.
    pub fn estimate_messages(&self, messages: &[Message]) -> u32 {
        messages
            .iter()
            .map(|m| self.estimate(&m.content))
            .fold(0u32, u32::saturating_add)
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("exact", &self.is_exact())
            .finish()
    }
}

#[cfg(feature = "tiktoken")]
fn cl100k() -> Option<Arc<CoreBPE>> {
    CL100K
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(e) => {
                tracing::debug!(error = %e, "cl100k_base unavailable, using character heuristic");
                None
            }
        })
        .clone()
}

#[inline]
fn heuristic_count(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_rounds_up() {
        let est = TokenEstimator::heuristic();
        assert!(!est.is_exact());
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("a"), 1);
        assert_eq!(est.estimate("abcd"), 1);
        assert_eq!(est.estimate("abcde"), 2);
        assert_eq!(est.estimate(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_heuristic_counts_chars_not_bytes() {
        let est = TokenEstimator::heuristic();
        // 4 chars, 8 bytes
        assert_eq!(est.estimate("éééé"), 1);
    }

    #[test]
    fn test_message_sum() {
        let est = TokenEstimator::heuristic();
        let messages = vec![
            Message::system("abcdefgh"),
            Message::user("abc"),
            Message::assistant(""),
        ];
        assert_eq!(est.estimate_messages(&messages), 3);
        assert_eq!(est.estimate_messages(&[]), 0);
    }

    #[cfg(feature = "tiktoken")]
    #[test]
    fn test_exact_estimator() {
        let est = TokenEstimator::new();
        if est.is_exact() {
            assert!(est.estimate("Hello, world!") > 0);
            assert_eq!(est.estimate(""), 0);
        }
    }

    #[cfg(feature = "tiktoken")]
    #[test]
    fn test_encoder_loaded_once() {
        let (Some(first), Some(second)) = (cl100k(), cl100k()) else {
            return;
        };
        assert!(Arc::ptr_eq(&first, &second));

        let a = TokenEstimator::new();
        let b = TokenEstimator::new();
        match (&a.strategy, &b.strategy) {
            (Strategy::Exact(x), Strategy::Exact(y)) => assert!(Arc::ptr_eq(x, y)),
            _ => panic!("expected exact estimators"),
        }
    }
}
