//! Streaming wire plumbing: SSE parsing and delta aggregation.
//!
//! The provider's streaming endpoint returns server-sent events. Each
//! `data:` line carries one JSON frame; frames arrive in a fixed grammar:
//!
//! ```text
//! message_start          → usage for the prompt side
//! content_block_start    → a text or tool_use block opens at an index
//! content_block_delta    → text_delta or input_json_delta for that index
//! content_block_stop     → the block is complete
//! message_delta          → stop_reason and output-token usage
//! message_stop           → end of stream
//! ```
//!
//! Tool-use input arrives as *partial JSON strings* split at arbitrary
//! byte positions, so the aggregator accumulates the raw string per block
//! index and parses it only once the stream finishes. The
//! [`DeltaAggregator`] folds the frames into [`StreamDelta`]s: text deltas
//! and tool-use-opened notices as they happen, then a single
//! [`StreamDelta::Final`] carrying the assembled content blocks, the stop
//! reason, and merged usage.

use std::collections::BTreeMap;

use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;

use crate::types::{
    ContentBlock, StopReason, StreamDelta, StreamFinal, TextBlock, ToolUseBlock, UsageInfo,
};
use crate::{Error, Result};

// ============================================================================
// WIRE FRAMES
// ============================================================================

/// One parsed SSE frame from the streaming messages endpoint.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// Stream opened; carries prompt-side usage.
    MessageStart { message: WireMessageStart },
    /// A content block opened at `index`.
    ContentBlockStart {
        index: u32,
        content_block: WireContentBlock,
    },
    /// Incremental payload for the block at `index`.
    ContentBlockDelta { index: u32, delta: WireDelta },
    /// The block at `index` is complete.
    ContentBlockStop { index: u32 },
    /// Generation finished; carries the stop reason and output usage.
    MessageDelta {
        delta: WireMessageDelta,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    /// End of stream.
    MessageStop,
    /// Keepalive; ignored.
    Ping,
    /// Server-reported error frame.
    Error { error: WireError },
}

#[derive(Debug, Deserialize)]
pub struct WireMessageStart {
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
pub struct WireMessageDelta {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub message: String,
}

/// Parses an HTTP response body into a stream of [`WireEvent`]s.
///
/// The terminal `message_stop` frame ends the logical stream; anything
/// that fails SSE or JSON parsing surfaces as a connection error.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<WireEvent>> + Send {
    response
        .bytes_stream()
        .eventsource()
        .map(|item| match item {
            Ok(event) => serde_json::from_str::<WireEvent>(&event.data)
                .map_err(|e| Error::connection(format!("malformed stream frame: {e}"))),
            Err(e) => Err(Error::connection(format!("stream read failed: {e}"))),
        })
}

// ============================================================================
// DELTA AGGREGATION
// ============================================================================

/// An in-progress content block being assembled from deltas.
#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        /// Raw argument JSON accumulated across deltas; parsed at finish.
        input_json: String,
    },
}

/// Folds wire frames into [`StreamDelta`]s.
///
/// Stateful accumulator: text deltas pass through immediately, tool-use
/// input accumulates as a raw string per block index, and the final frame
/// produces the assembled [`StreamFinal`]. Blocks are keyed by their wire
/// index so interleaved tool calls assemble independently.
#[derive(Debug, Default)]
pub struct DeltaAggregator {
    blocks: BTreeMap<u32, PartialBlock>,
    usage: UsageInfo,
    stop_reason: Option<StopReason>,
}

impl DeltaAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one frame, returning any deltas it produced.
    pub fn process(&mut self, event: WireEvent) -> Result<Vec<StreamDelta>> {
        match event {
            WireEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage.input_tokens = usage.input_tokens;
                    self.usage.cache_creation_input_tokens = usage.cache_creation_input_tokens;
                    self.usage.cache_read_input_tokens = usage.cache_read_input_tokens;
                }
                Ok(Vec::new())
            }
            WireEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                WireContentBlock::Text { text } => {
                    self.blocks.insert(index, PartialBlock::Text(text.clone()));
                    if text.is_empty() {
                        Ok(Vec::new())
                    } else {
                        Ok(vec![StreamDelta::Text(text)])
                    }
                }
                WireContentBlock::ToolUse { id, name } => {
                    self.blocks.insert(
                        index,
                        PartialBlock::ToolUse {
                            id,
                            name: name.clone(),
                            input_json: String::new(),
                        },
                    );
                    Ok(vec![StreamDelta::ToolUseStarted { name }])
                }
            },
            WireEvent::ContentBlockDelta { index, delta } => {
                let block = self.blocks.get_mut(&index).ok_or_else(|| {
                    Error::connection(format!("delta for unknown block index {index}"))
                })?;
                match (block, delta) {
                    (PartialBlock::Text(buffer), WireDelta::TextDelta { text }) => {
                        buffer.push_str(&text);
                        Ok(vec![StreamDelta::Text(text)])
                    }
                    (
                        PartialBlock::ToolUse { input_json, .. },
                        WireDelta::InputJsonDelta { partial_json },
                    ) => {
                        input_json.push_str(&partial_json);
                        Ok(Vec::new())
                    }
                    _ => Err(Error::connection(format!(
                        "delta type mismatch at block index {index}"
                    ))),
                }
            }
            WireEvent::ContentBlockStop { .. } => Ok(Vec::new()),
            WireEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = Some(parse_stop_reason(&reason)?);
                }
                Ok(Vec::new())
            }
            WireEvent::MessageStop => {
                let final_ = self.finish()?;
                Ok(vec![StreamDelta::Final(final_)])
            }
            WireEvent::Ping => Ok(Vec::new()),
            WireEvent::Error { error } => Err(Error::provider(error.message)),
        }
    }

    /// Assembles the final content blocks in wire-index order.
    fn finish(&mut self) -> Result<StreamFinal> {
        let mut content = Vec::with_capacity(self.blocks.len());
        for (_, block) in std::mem::take(&mut self.blocks) {
            match block {
                PartialBlock::Text(text) => {
                    content.push(ContentBlock::Text(TextBlock::new(text)));
                }
                PartialBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let input = if input_json.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&input_json).map_err(|e| {
                            Error::provider(format!("tool input for '{name}' is not valid JSON: {e}"))
                        })?
                    };
                    content.push(ContentBlock::ToolUse(ToolUseBlock::new(id, name, input)));
                }
            }
        }

        let stop_reason = self.stop_reason.take().unwrap_or(StopReason::EndTurn);
        Ok(StreamFinal {
            content,
            stop_reason,
            usage: self.usage,
        })
    }
}

fn parse_stop_reason(raw: &str) -> Result<StopReason> {
    match raw {
        "end_turn" | "stop_sequence" => Ok(StopReason::EndTurn),
        "tool_use" => Ok(StopReason::ToolUse),
        "max_tokens" => Ok(StopReason::MaxTokens),
        other => Err(Error::provider(format!("unknown stop_reason: {other}"))),
    }
}
