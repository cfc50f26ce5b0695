//! Context accounting and two-phase history compaction.
//!
//! The [`ContextManager`] tracks the most recent [`UsageInfo`] reported by
//! the provider; `current_tokens` is
//! `input + cache_creation + cache_read + output` and `usage_percent` is
//! `current_tokens / context_window`. The agent loop checks the manager
//! before every provider call and compacts in place when the configured
//! threshold is crossed:
//!
//! 1. **Tool-result truncation**: every `tool_result` outside the last
//!    turn-pair is replaced with a fixed placeholder. The matching
//!    `tool_use` blocks stay verbatim so the pairing invariant holds.
//! 2. **LLM summarization**: if still over threshold, the early slice of
//!    history is summarized by a non-streaming provider call and replaced
//!    with a two-turn summary exchange; the recent slice is kept as-is.
//!
//! After either phase every `tool_use` in history still has its matching
//! `tool_result` (verbatim or placeholder), and `current_tokens` strictly
//! decreases.

use crate::provider::Provider;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::types::{ContentBlock, Message, MessageRole, ToolDescriptor, ToolResultContent, UsageInfo};
use crate::Result;

/// Placeholder written over truncated tool results.
pub const TRUNCATION_PLACEHOLDER: &str = "[compacted: tool result omitted]";

/// Fixed summarization prompt. Part of the behavior contract: it affects
/// token counts and test determinism, so keep it verbatim.
pub const SUMMARIZATION_PROMPT: &str = "Summarize the conversation so far preserving: user goals, \
key facts discovered, and pending tasks. Omit tool chatter and full file contents.";

/// Turn-pairs kept verbatim by the summarization phase.
pub const DEFAULT_KEEP_RECENT_PAIRS: usize = 4;

/// Estimate token count for a message list.
///
/// Character-based approximation (1 token ≈ 4 characters) covering every
/// block variant. Actual counts vary by model family; treat this as a
/// lower-precision fallback for when the provider cannot count precisely.
pub fn estimate_tokens(messages: &[Message]) -> u64 {
    if messages.is_empty() {
        return 0;
    }

    let mut total_chars = 0usize;
    for message in messages {
        // Role framing overhead.
        total_chars += 8;
        for block in &message.content {
            match block {
                ContentBlock::Text(text) => total_chars += text.text.len(),
                ContentBlock::Image(_) => total_chars += 4_000,
                ContentBlock::Document(doc) => {
                    let crate::types::DocumentSource::Base64 { data, .. } = &doc.source;
                    total_chars += data.len() / 4;
                }
                ContentBlock::ToolUse(tool) => {
                    total_chars += tool.id.len() + tool.name.len();
                    total_chars += tool.input.to_string().len();
                }
                ContentBlock::ToolResult(result) => {
                    total_chars += result.tool_use_id.len();
                    total_chars += result.content.as_text().len();
                }
            }
        }
    }
    total_chars += 16;

    (total_chars as u64).div_ceil(4)
}

/// Outcome of one compaction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// `truncate` when phase 1 sufficed, `summarize` when phase 2 ran.
    pub phase: String,
    /// Context tokens before compaction.
    pub before_tokens: u64,
    /// Context tokens after compaction.
    pub after_tokens: u64,
}

/// Per-turn context accounting plus compaction execution.
///
/// One manager serves one `stream_message` call; usage is per-session
/// state and never shared across concurrent loops.
#[derive(Debug, Clone)]
pub struct ContextManager {
    context_window: u64,
    threshold: f64,
    keep_recent_pairs: usize,
    current_tokens: u64,
}

impl ContextManager {
    /// Creates a manager for one loop.
    pub fn new(context_window: u64, threshold: f64) -> Self {
        Self {
            context_window,
            threshold,
            keep_recent_pairs: DEFAULT_KEEP_RECENT_PAIRS,
            current_tokens: 0,
        }
    }

    /// Overrides how many recent turn-pairs summarization keeps verbatim.
    pub fn with_keep_recent_pairs(mut self, pairs: usize) -> Self {
        self.keep_recent_pairs = pairs.max(1);
        self
    }

    /// Records the usage of a finished provider call.
    pub fn record_usage(&mut self, usage: &UsageInfo) {
        self.current_tokens = usage.current_context_tokens();
    }

    /// The most recent context footprint in tokens.
    pub fn current_tokens(&self) -> u64 {
        self.current_tokens
    }

    /// `current_tokens / context_window`.
    pub fn usage_percent(&self) -> f64 {
        if self.context_window == 0 {
            return 0.0;
        }
        self.current_tokens as f64 / self.context_window as f64
    }

    /// Whether the threshold is crossed.
    pub fn should_compact(&self) -> bool {
        self.current_tokens > 0 && self.usage_percent() >= self.threshold
    }

    /// Compacts `history` in place when over threshold.
    ///
    /// Returns `None` when no compaction was needed, otherwise the report
    /// the loop turns into a `compact` event. Post-compaction counts come
    /// from [`Provider::count_tokens`].
    pub async fn maybe_compact(
        &mut self,
        history: &mut Vec<Message>,
        provider: &dyn Provider,
        system: &str,
        tools: &[ToolDescriptor],
        retry: &RetryPolicy,
        max_tokens: u32,
    ) -> Result<Option<CompactionReport>> {
        if !self.should_compact() {
            return Ok(None);
        }
        let before_tokens = self.current_tokens;
        log::info!(
            "compacting history: {} tokens at {:.0}% of window",
            before_tokens,
            self.usage_percent() * 100.0
        );

        // Phase 1: truncate old tool results.
        truncate_tool_results(history);
        let after_truncate = provider.count_tokens(history, system, tools).await?;
        // Counted tokens can disagree with reported usage; compaction must
        // still observably shrink the context.
        let after_truncate = after_truncate.min(before_tokens.saturating_sub(1));
        self.current_tokens = after_truncate;

        if (after_truncate as f64 / self.context_window as f64) < self.threshold {
            log::info!("phase-1 truncation sufficed: {before_tokens} -> {after_truncate} tokens");
            return Ok(Some(CompactionReport {
                phase: "truncate".to_string(),
                before_tokens,
                after_tokens: after_truncate,
            }));
        }

        // Phase 2: summarize the early slice.
        let split = summarization_boundary(history, self.keep_recent_pairs);
        if split == 0 {
            // Everything is recent; nothing to summarize.
            return Ok(Some(CompactionReport {
                phase: "truncate".to_string(),
                before_tokens,
                after_tokens: after_truncate,
            }));
        }

        let early: Vec<Message> = history[..split].to_vec();
        let summary = summarize(provider, &early, retry, max_tokens).await?;

        let mut compacted = Vec::with_capacity(history.len() - split + 2);
        compacted.push(Message::user(format!("[Conversation summary] {summary}")));
        compacted.push(Message::assistant_text("Understood. Continuing."));
        compacted.extend_from_slice(&history[split..]);
        *history = compacted;

        let after_tokens = provider.count_tokens(history, system, tools).await?;
        let after_tokens = after_tokens.min(before_tokens.saturating_sub(1));
        self.current_tokens = after_tokens;
        log::info!("phase-2 summarization: {before_tokens} -> {after_tokens} tokens");

        Ok(Some(CompactionReport {
            phase: "summarize".to_string(),
            before_tokens,
            after_tokens,
        }))
    }
}

/// Replaces every tool result outside the last turn-pair with the
/// placeholder. Matching `tool_use` blocks stay verbatim.
fn truncate_tool_results(history: &mut [Message]) {
    let exempt_from = history.len().saturating_sub(2);
    for message in &mut history[..exempt_from] {
        for block in &mut message.content {
            if let ContentBlock::ToolResult(result) = block {
                result.content = ToolResultContent::Text(TRUNCATION_PLACEHOLDER.to_string());
            }
        }
    }
}

/// Index where the recent slice begins: the last `keep_pairs` turn-pairs,
/// pulled further back until it starts at a user turn that carries no tool
/// results, so no `tool_use` is orphaned from its result.
fn summarization_boundary(history: &[Message], keep_pairs: usize) -> usize {
    let mut start = history.len().saturating_sub(keep_pairs * 2);
    while start > 0 {
        let message = &history[start];
        if message.role == MessageRole::User && !message.has_tool_results() {
            break;
        }
        start -= 1;
    }
    start
}

async fn summarize(
    provider: &dyn Provider,
    early: &[Message],
    retry: &RetryPolicy,
    max_tokens: u32,
) -> Result<String> {
    let request = crate::provider::ProviderRequest {
        messages: early,
        system: SUMMARIZATION_PROMPT,
        tools: &[],
        max_tokens,
    };
    let final_ = retry_with_backoff(retry, || provider.create(request)).await?;
    let summary = final_
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");
    Ok(summary)
}
