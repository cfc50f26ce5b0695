//! Core type definitions for the agent runtime.
//!
//! The type system is organized into three areas:
//!
//! # Message System
//!
//! Conversations are ordered sequences of [`Message`]s. Each message has a
//! [`MessageRole`] and a list of [`ContentBlock`]s supporting multi-modal
//! content:
//!
//! - [`TextBlock`]: plain text
//! - [`ImageBlock`]: base64 or URL image source
//! - [`DocumentBlock`]: base64 PDF
//! - [`ToolUseBlock`]: a model request to execute a tool
//! - [`ToolResultBlock`]: the result of a tool execution
//!
//! The system prompt is not a message; it travels separately on each
//! provider call.
//!
//! # Structural invariants
//!
//! Every `tool_use` emitted by the assistant in turn *n* is matched by
//! exactly one `tool_result` with the same id in the very next user turn.
//! `tool_use` never appears in a user turn and `tool_result` never appears
//! in an assistant turn. The agent loop maintains this; [`UserInput`]
//! validation rejects caller attempts to break it.
//!
//! # Streaming
//!
//! [`StreamDelta`] is the unit a [`crate::Provider`] yields while
//! generating; [`AgentEvent`] is the unit the agent loop emits to the
//! caller and persists to the event store.
//!
//! # Serialization
//!
//! Content blocks use serde's internally tagged format with a `"type"`
//! field:
//!
//! ```json
//! {"type": "text", "text": "Hello"}
//! {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {...}}
//! {"type": "tool_result", "tool_use_id": "toolu_1", "content": "...", "is_error": false}
//! ```
//!
//! Messages round-trip losslessly through JSON, including arbitrary
//! `tool_use.input` payloads; the persistent session backends rely on this.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum decoded size of an image attachment.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Maximum decoded size of a PDF attachment.
pub const MAX_DOCUMENT_BYTES: usize = 32 * 1024 * 1024;

// ============================================================================
// MESSAGES AND CONTENT BLOCKS
// ============================================================================

/// Identifies the sender of a message.
///
/// Only `user` and `assistant` appear in conversation history; the system
/// prompt is carried out-of-band on every provider call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Input from the caller, including aggregated tool results.
    User,
    /// Model output, including tool use requests.
    Assistant,
}

/// Multi-modal content blocks that can appear in messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text(TextBlock),
    /// Image content (base64 payload or URL).
    Image(ImageBlock),
    /// PDF document content (base64 payload).
    Document(DocumentBlock),
    /// Tool use request from the model.
    ToolUse(ToolUseBlock),
    /// Tool execution result sent back to the model.
    ToolResult(ToolResultBlock),
}

impl ContentBlock {
    /// Convenience constructor for a text block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(TextBlock::new(text))
    }
}

/// Plain text content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBlock {
    /// The text content.
    pub text: String,
}

impl TextBlock {
    /// Creates a new text block from any string-like type.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Where an image's bytes come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Inline base64 payload.
    Base64 {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// Base64-encoded image bytes.
        data: String,
    },
    /// Remote image fetched by the provider.
    Url {
        /// The image URL.
        url: String,
    },
}

/// Image content block for vision-capable models.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageBlock {
    /// The image source.
    pub source: ImageSource,
}

impl ImageBlock {
    /// Creates an image block from base64 data and a MIME type.
    pub fn from_base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Base64 {
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }

    /// Creates an image block from a URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Url { url: url.into() },
        }
    }
}

/// Where a document's bytes come from. Only inline base64 is supported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentSource {
    /// Inline base64 payload.
    Base64 {
        /// MIME type; must be `application/pdf`.
        media_type: String,
        /// Base64-encoded document bytes.
        data: String,
    },
}

/// PDF document content block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentBlock {
    /// The document source.
    pub source: DocumentSource,
}

impl DocumentBlock {
    /// Creates a document block from base64 PDF data.
    pub fn from_base64(data: impl Into<String>) -> Self {
        Self {
            source: DocumentSource::Base64 {
                media_type: "application/pdf".to_string(),
                data: data.into(),
            },
        }
    }
}

/// Tool use request from the model.
///
/// The `id` correlates this request with the [`ToolResultBlock`] the loop
/// appends in the next user turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseBlock {
    /// Unique identifier for this tool call, generated by the model.
    pub id: String,
    /// Name of the tool to execute.
    pub name: String,
    /// Structured arguments matching the tool's input schema.
    pub input: serde_json::Value,
}

impl ToolUseBlock {
    /// Creates a new tool use block.
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Payload of a tool result: a plain string or structured blocks.
///
/// String results are subject to pagination by the tool registry; block
/// results pass through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Plain text result.
    Text(String),
    /// Structured content blocks.
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    /// The text of the result; block results are flattened to their text
    /// blocks joined by newlines.
    pub fn as_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text(t) => Some(t.text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for ToolResultContent {
    fn from(s: String) -> Self {
        ToolResultContent::Text(s)
    }
}

impl From<&str> for ToolResultContent {
    fn from(s: &str) -> Self {
        ToolResultContent::Text(s.to_string())
    }
}

/// Tool execution result sent back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultBlock {
    /// ID of the tool use request this result answers.
    pub tool_use_id: String,
    /// The result payload.
    pub content: ToolResultContent,
    /// Whether the tool failed. Failed results carry a short error message
    /// as their content; they never abort the loop.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultBlock {
    /// Creates a successful tool result.
    pub fn new(tool_use_id: impl Into<String>, content: impl Into<ToolResultContent>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Creates a failed tool result carrying a short error message.
    pub fn error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: ToolResultContent::Text(message.into()),
            is_error: true,
        }
    }
}

/// A complete message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// The role of this message.
    pub role: MessageRole,
    /// The content blocks that make up this message.
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Creates a new message with the specified role and content.
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// Creates a user message from plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![ContentBlock::text(text)])
    }

    /// Creates a user message from content blocks.
    pub fn user_with_blocks(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Creates an assistant message from content blocks.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Creates an assistant message from plain text.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, vec![ContentBlock::text(text)])
    }

    /// Concatenated text of all text blocks in this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool use blocks in this message, in order.
    pub fn tool_uses(&self) -> Vec<&ToolUseBlock> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Whether this message contains any tool result block.
    pub fn has_tool_results(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult(_)))
    }
}

// ============================================================================
// USAGE ACCOUNTING
// ============================================================================

/// Token usage reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageInfo {
    /// Uncached input tokens.
    pub input_tokens: u64,
    /// Output tokens generated.
    pub output_tokens: u64,
    /// Input tokens written to the prompt cache.
    pub cache_creation_input_tokens: u64,
    /// Input tokens read from the prompt cache.
    pub cache_read_input_tokens: u64,
}

impl UsageInfo {
    /// Total context footprint of the call:
    /// `input + cache_creation + cache_read + output`.
    pub fn current_context_tokens(&self) -> u64 {
        self.input_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
            + self.output_tokens
    }
}

// ============================================================================
// CALLER INPUT
// ============================================================================

/// One user turn as supplied by the caller: plain text or mixed blocks.
#[derive(Debug, Clone)]
pub enum UserInput {
    /// Plain text.
    Text(String),
    /// Mixed content blocks (text plus attachments).
    Blocks(Vec<ContentBlock>),
}

impl From<&str> for UserInput {
    fn from(s: &str) -> Self {
        UserInput::Text(s.to_string())
    }
}

impl From<String> for UserInput {
    fn from(s: String) -> Self {
        UserInput::Text(s)
    }
}

impl From<Vec<ContentBlock>> for UserInput {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        UserInput::Blocks(blocks)
    }
}

impl UserInput {
    /// Validates the input and converts it into the content blocks of the
    /// new user turn.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when:
    /// - text is empty after whitespace trim;
    /// - an image attachment exceeds 20 MB decoded or has a non-`image/*`
    ///   media type;
    /// - a document attachment exceeds 32 MB decoded or is not
    ///   `application/pdf`;
    /// - the blocks contain `tool_use` or `tool_result` (those are produced
    ///   by the loop, never accepted from the caller).
    pub fn into_validated_blocks(self) -> Result<Vec<ContentBlock>> {
        match self {
            UserInput::Text(text) => {
                if text.trim().is_empty() {
                    return Err(Error::invalid_input("message text is empty"));
                }
                Ok(vec![ContentBlock::text(text)])
            }
            UserInput::Blocks(blocks) => {
                if blocks.is_empty() {
                    return Err(Error::invalid_input("message has no content blocks"));
                }
                for block in &blocks {
                    validate_input_block(block)?;
                }
                Ok(blocks)
            }
        }
    }
}

fn validate_input_block(block: &ContentBlock) -> Result<()> {
    match block {
        ContentBlock::Text(_) => Ok(()),
        ContentBlock::Image(image) => match &image.source {
            ImageSource::Base64 { media_type, data } => {
                if !media_type.starts_with("image/") {
                    return Err(Error::invalid_input(format!(
                        "unsupported image media type: {media_type}"
                    )));
                }
                let decoded = base64::decoded_len_estimate(data.len());
                if decoded > MAX_IMAGE_BYTES {
                    return Err(Error::invalid_input(format!(
                        "image attachment too large: ~{decoded} bytes (max {MAX_IMAGE_BYTES})"
                    )));
                }
                Ok(())
            }
            ImageSource::Url { url } => {
                if url.trim().is_empty() {
                    return Err(Error::invalid_input("image url is empty"));
                }
                Ok(())
            }
        },
        ContentBlock::Document(doc) => match &doc.source {
            DocumentSource::Base64 { media_type, data } => {
                if media_type != "application/pdf" {
                    return Err(Error::invalid_input(format!(
                        "unsupported document media type: {media_type}"
                    )));
                }
                let decoded = base64::decoded_len_estimate(data.len());
                if decoded > MAX_DOCUMENT_BYTES {
                    return Err(Error::invalid_input(format!(
                        "document attachment too large: ~{decoded} bytes (max {MAX_DOCUMENT_BYTES})"
                    )));
                }
                Ok(())
            }
        },
        ContentBlock::ToolUse(_) => {
            Err(Error::invalid_input("tool_use not allowed in user input"))
        }
        ContentBlock::ToolResult(_) => {
            Err(Error::invalid_input("tool_result not allowed in user input"))
        }
    }
}

// ============================================================================
// PROVIDER STREAMING
// ============================================================================

/// The wire-level view of one tool: what the model sees.
///
/// Produced by [`crate::ToolRegistry::definitions`] and serialized into
/// provider requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    /// Tool name; MCP-sourced tools carry a `<server>__` prefix.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON Schema of the tool's input object.
    pub input_schema: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced a terminal answer.
    EndTurn,
    /// The model requested one or more tool executions.
    ToolUse,
    /// The output-token budget was exhausted.
    MaxTokens,
}

/// The finalized result of one provider call.
#[derive(Debug, Clone)]
pub struct StreamFinal {
    /// The assistant turn's complete content blocks.
    pub content: Vec<ContentBlock>,
    /// Why generation stopped.
    pub stop_reason: StopReason,
    /// Token usage for the call.
    pub usage: UsageInfo,
}

/// One item yielded by a streaming provider call.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// An incremental text delta.
    Text(String),
    /// A tool use block opened on the stream. Emitted before its input JSON
    /// has fully arrived; used to detect the preamble boundary.
    ToolUseStarted {
        /// The tool's name.
        name: String,
    },
    /// The stream finished; always the last item.
    Final(StreamFinal),
}

// ============================================================================
// AGENT EVENTS
// ============================================================================

/// Execution status carried by a `tool_call` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    /// Dispatch is about to run.
    Started,
    /// The handler returned successfully.
    Completed,
    /// The handler failed; the failure became an `is_error` tool result.
    Failed,
}

impl ToolCallStatus {
    /// Wire-level status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallStatus::Started => "started",
            ToolCallStatus::Completed => "completed",
            ToolCallStatus::Failed => "failed",
        }
    }
}

/// One event emitted by [`crate::Agent::stream_message`].
///
/// The wire-level kind names (`token`, `tool_call`, `preamble_end`,
/// `retry`, `compact`, `done`, `error`, `file_change`) and the shape of
/// each event's data payload are part of the public contract; the event
/// store persists exactly [`AgentEvent::kind`] + [`AgentEvent::data`].
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// An incremental text delta from the model.
    Token {
        /// The raw delta text.
        text: String,
    },
    /// Lifecycle of one tool execution.
    ToolCall {
        /// Tool name.
        name: String,
        /// started | completed | failed.
        status: ToolCallStatus,
        /// One-line rendering: tool name plus its arguments,
        /// e.g. `read_file path=src/x.py`.
        summary: String,
        /// Short error message when status is `failed`.
        error: Option<String>,
    },
    /// Boundary between assistant preamble text and the turn's first tool
    /// use.
    PreambleEnd,
    /// A transient provider failure is being retried.
    Retry {
        /// 0-indexed attempt that just failed.
        attempt: u32,
        /// Configured retry budget.
        max_retries: u32,
        /// Stable kind string of the error ([`Error::kind`]).
        error_kind: String,
    },
    /// History was compacted before a provider call.
    Compact {
        /// `truncate` (phase 1) or `summarize` (phase 2).
        phase: String,
        /// Context tokens before compaction.
        before_tokens: u64,
        /// Context tokens after compaction.
        after_tokens: u64,
    },
    /// The turn finished; always the last event of a successful stream.
    Done,
    /// The loop terminated on a fatal error; always the last event of a
    /// failed stream.
    Error {
        /// Stable kind string of the error ([`Error::kind`]).
        error_type: String,
        /// Human-readable message.
        message: String,
    },
    /// A file was changed by a tool (passed through from the edit tool's
    /// side channel; the core never originates these).
    FileChange {
        /// Path of the changed file.
        path: String,
        /// Unified diff of the change.
        diff: String,
    },
}

impl AgentEvent {
    /// Wire-level event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Token { .. } => "token",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::PreambleEnd => "preamble_end",
            AgentEvent::Retry { .. } => "retry",
            AgentEvent::Compact { .. } => "compact",
            AgentEvent::Done => "done",
            AgentEvent::Error { .. } => "error",
            AgentEvent::FileChange { .. } => "file_change",
        }
    }

    /// Opaque JSON payload persisted alongside the kind.
    ///
    /// Token payloads are the JSON-encoded string delta so newlines and
    /// control characters round-trip; `preamble_end` and `done` carry null.
    pub fn data(&self) -> serde_json::Value {
        match self {
            AgentEvent::Token { text } => serde_json::Value::String(text.clone()),
            AgentEvent::ToolCall {
                name,
                status,
                summary,
                error,
            } => serde_json::json!({
                "name": name,
                "status": status.as_str(),
                "summary": summary,
                "error": error,
            }),
            AgentEvent::PreambleEnd => serde_json::Value::Null,
            AgentEvent::Retry {
                attempt,
                max_retries,
                error_kind,
            } => serde_json::json!({
                "attempt": attempt,
                "max_retries": max_retries,
                "error_kind": error_kind,
            }),
            AgentEvent::Compact {
                phase,
                before_tokens,
                after_tokens,
            } => serde_json::json!({
                "phase": phase,
                "before_tokens": before_tokens,
                "after_tokens": after_tokens,
            }),
            AgentEvent::Done => serde_json::Value::Null,
            AgentEvent::Error {
                error_type,
                message,
            } => serde_json::json!({
                "type": error_type,
                "message": message,
            }),
            AgentEvent::FileChange { path, diff } => serde_json::json!({
                "path": path,
                "diff": diff,
            }),
        }
    }
}
