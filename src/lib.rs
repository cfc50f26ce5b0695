//! # Agent Core SDK
//!
//! An embeddable AI agent runtime: a library that drives the conversational
//! loop between a caller, a streaming LLM backend, and a pluggable set of
//! tools, keeping it correct under concurrency, partial failure, and
//! growing context.
//!
//! ## What the runtime does
//!
//! - **Streams** tokens and structured events to the caller as the model
//!   generates, with caller-paced back-pressure.
//! - **Dispatches** every tool call the model requests, concurrently,
//!   folding results (and failures) back into the conversation.
//! - **Bounds context**: token accounting from provider usage reports plus
//!   two-phase compaction (tool-result truncation, then LLM
//!   summarization).
//! - **Persists** conversation history and usage per session: in memory,
//!   in SQLite, or in an external key-value store.
//! - **Resumes** interrupted clients from an ordered, offset-addressable
//!   event log.
//! - **Recovers** from transient provider failures with deterministic
//!   exponential backoff.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use agent_core::{Agent, AgentCoreConfig, AgentEvent, ProviderConfig, ToolOutput, tool};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> agent_core::Result<()> {
//!     let provider = ProviderConfig::builder()
//!         .model("claude-sonnet-4-5")
//!         .api_key(std::env::var("API_KEY").unwrap_or_default())
//!         .build()?;
//!     let config = AgentCoreConfig::builder(provider)
//!         .system_prompt("You are a helpful assistant")
//!         .build()?;
//!
//!     let agent = Agent::builder(config).build()?;
//!     agent.tools().register(
//!         tool("get_time", "Current UTC time")
//!             .build(|_| async { Ok(ToolOutput::text("12:00Z")) }),
//!     )?;
//!
//!     let mut events = agent.stream_message("What time is it?", "session-1", None).await?;
//!     while let Some(event) = events.next().await {
//!         match event {
//!             AgentEvent::Token { text } => print!("{text}"),
//!             AgentEvent::Done => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **agent**: the loop itself (prompt composition, streaming, tool
//!   fan-out, iteration caps, event emission)
//! - **provider**: streaming LLM abstraction, error normalization, prompt
//!   caching, token counting
//! - **tools**: tool registry, parallel dispatch, oversized-result
//!   pagination
//! - **skills**: two-phase prompt enrichment
//! - **context**: token accounting and two-phase compaction
//! - **session**: per-session history and usage persistence
//! - **events**: resumable, offset-addressable event log
//! - **subagent**: the built-in `create_subagent` tool
//! - **mcp** / **sandbox**: consumed capability seams
//! - **types** / **config** / **error**: the shared vocabulary

mod agent;
mod config;
mod error;
mod events;
mod mcp;
mod provider;
mod sandbox;
mod session;
mod skills;
mod sse;
mod subagent;
mod tools;
mod types;

/// Context accounting, compaction, and the token estimator.
pub mod context;

/// Retry policy and backoff helpers, public so callers can wrap their own
/// provider operations.
pub mod retry;

// --- Agent loop ---

pub use agent::{Agent, AgentBuilder, EventStream};

// --- Configuration ---

pub use config::{
    AgentCoreConfig, AgentCoreConfigBuilder, DEFAULT_CONTEXT_WINDOW, ModelInfo, ProviderConfig,
    ProviderConfigBuilder, ToolRegistryOptions, context_window_for, lookup_model,
};

// --- Context management ---

pub use context::{
    CompactionReport, ContextManager, SUMMARIZATION_PROMPT, TRUNCATION_PLACEHOLDER,
    estimate_tokens,
};

// --- Error handling ---

pub use error::{Error, Result};

// --- Event store ---

pub use events::{EventStore, InMemoryEventStore, SqliteEventStore, StoredEvent, StreamStatus};

// --- MCP adaptation ---

pub use mcp::{MCPClient, McpToolAdapter};

// --- Provider abstraction ---

pub use provider::{HttpProvider, Provider, ProviderRequest, ProviderStream, local_token_estimate};

// --- Sandbox capability ---

pub use sandbox::{ExecResult, Sandbox};

// --- Session persistence ---

pub use session::{
    InMemoryKvStore, InMemorySessionBackend, KvSessionBackend, KvStore, SessionBackend,
    SessionMeta, SqliteSessionBackend,
};

// --- Skills ---

pub use skills::{Skill, SkillRegistry};

// --- Subagent ---

pub use subagent::SUBAGENT_TOOL;

// --- Tool system ---

pub use tools::{
    READ_MORE_TOOL, Tool, ToolBuilder, ToolExecution, ToolHandler, ToolOutput, ToolRegistry,
    ToolSource, summarize_call, tool,
};

// --- Core types ---

pub use types::{
    AgentEvent, ContentBlock, DocumentBlock, DocumentSource, ImageBlock, ImageSource, Message,
    MessageRole, StopReason, StreamDelta, StreamFinal, TextBlock, ToolCallStatus, ToolDescriptor,
    ToolResultBlock, ToolResultContent, ToolUseBlock, UsageInfo, UserInput,
};

/// The most commonly used surface in one import:
/// `use agent_core::prelude::*;`
pub mod prelude {
    pub use crate::{
        Agent, AgentCoreConfig, AgentEvent, ContentBlock, Error, EventStore, Message, MessageRole,
        Provider, ProviderConfig, Result, SessionBackend, Skill, SkillRegistry, TextBlock, Tool,
        ToolOutput, ToolRegistry, ToolUseBlock, UsageInfo, UserInput, tool,
    };
}
