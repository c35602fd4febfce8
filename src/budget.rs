//! Token budget tracking
//!
//! Counters are atomic because multiple workers in the same batch complete
//! concurrently. Usage only ever grows; it is never decremented.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::types::TokenUsage;

/// Rough token estimate for a completion that has not happened yet
pub const ESTIMATED_COMPLETION_TOKENS: u64 = 1_024;

/// Cheap length-based token estimate (~4 bytes per token)
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Tracks cumulative token usage against an optional ceiling
pub struct BudgetTracker {
    max_total_tokens: u64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl BudgetTracker {
    /// `max_total_tokens` of 0 means unlimited
    pub fn new(max_total_tokens: u64) -> Self {
        Self {
            max_total_tokens,
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        }
    }

    /// Record usage from one completed backend call
    pub fn record(&self, usage: &TokenUsage) {
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
    }

    /// Cumulative usage so far
    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }

    /// Whether a round with the given rough estimate may begin
    pub fn allows_round(&self, estimate: u64) -> bool {
        if self.max_total_tokens == 0 {
            return true;
        }
        let used = self.usage().total();
        let fits = used.saturating_add(estimate) <= self.max_total_tokens;
        if !fits {
            debug!(used, estimate, ceiling = self.max_total_tokens, "Round exceeds token budget");
        }
        fits
    }

    /// Rough cost of one round: every worker sends the prompt and produces
    /// a completion-sized answer
    pub fn round_estimate(&self, prompt: &str, workers: usize) -> u64 {
        workers as u64 * (estimate_tokens(prompt) + ESTIMATED_COMPLETION_TOKENS)
    }
}
