//! The agent loop: the state machine at the heart of the runtime.
//!
//! [`Agent::stream_message`] drives one conversational turn. Each loop
//! iteration:
//!
//! 1. asks the [`ContextManager`] whether history must compact;
//! 2. composes the system prompt (`base ⊕ skill catalogue`) and the tool
//!    definitions;
//! 3. streams one provider call, emitting `token` events per text delta, a
//!    single `preamble_end` at the boundary between assistant text and the
//!    turn's first tool use, and `retry` events while transient failures
//!    back off;
//! 4. decides: `end_turn` (or `max_tokens` without tool use) persists the
//!    assistant turn and emits `done`; `tool_use` fans out every requested
//!    call concurrently, folds the results into the next user turn, and
//!    loops.
//!
//! Individual tool failures become `is_error` tool results and never abort
//! the loop. The iteration cap appends a synthetic assistant turn instead
//! of erroring. Fatal provider errors persist any partial assistant text,
//! surface as a single `error` event, and mark the bound event-store
//! stream failed.
//!
//! # Concurrency
//!
//! The loop runs as a spawned producer writing into a bounded channel; the
//! returned stream is the consumer half, so the caller's pull pace
//! back-pressures the producer. Dropping the stream closes the channel:
//! the producer notices at its next emission or suspension point, cancels
//! outstanding provider/tool work, persists partial text, and marks the
//! stream failed. One `Agent` serves concurrent `stream_message` calls for
//! *different* session ids; callers must serialize calls touching the same
//! session.

use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::AgentCoreConfig;
use crate::context::ContextManager;
use crate::events::EventStore;
use crate::provider::{HttpProvider, Provider, ProviderRequest};
use crate::retry::RetryPolicy;
use crate::sandbox::Sandbox;
use crate::session::{InMemorySessionBackend, SessionBackend};
use crate::skills::SkillRegistry;
use crate::tools::{ToolRegistry, summarize_call};
use crate::types::{
    AgentEvent, ContentBlock, Message, StreamDelta, ToolCallStatus, ToolResultBlock, ToolUseBlock,
    UserInput,
};
use crate::{Error, Result};

/// The event sequence produced by one [`Agent::stream_message`] call.
pub type EventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Buffered events between producer and consumer; bounds how far the loop
/// can run ahead of a slow caller.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// An embeddable conversational agent.
///
/// Capabilities (provider, session backend, event store, sandbox) are
/// injected at construction; variants are selected by constructing a
/// different concrete value, not by subclassing.
///
/// # Examples
///
/// ```rust,no_run
/// use agent_core::{Agent, AgentCoreConfig, ProviderConfig};
/// use futures::StreamExt;
///
/// # async fn example() -> agent_core::Result<()> {
/// let provider = ProviderConfig::builder()
///     .model("claude-sonnet-4-5")
///     .api_key("sk-...")
///     .build()?;
/// let config = AgentCoreConfig::builder(provider)
///     .system_prompt("You are a helpful assistant")
///     .build()?;
///
/// let agent = Agent::builder(config).build()?;
/// let mut events = agent.stream_message("hello", "session-1", None).await?;
/// while let Some(event) = events.next().await {
///     println!("{:?}", event);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Agent {
    pub(crate) config: AgentCoreConfig,
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) sessions: Arc<dyn SessionBackend>,
    pub(crate) events: Option<Arc<dyn EventStore>>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) skills: Arc<SkillRegistry>,
    pub(crate) sandbox: Option<Arc<dyn Sandbox>>,
}

impl Agent {
    /// Creates a builder around a config.
    pub fn builder(config: AgentCoreConfig) -> AgentBuilder {
        AgentBuilder {
            config,
            provider: None,
            sessions: None,
            events: None,
            tools: None,
            skills: None,
            sandbox: None,
        }
    }

    /// The agent configuration.
    pub fn config(&self) -> &AgentCoreConfig {
        &self.config
    }

    /// The tool registry.
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// The skill registry.
    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.skills
    }

    /// The session backend.
    pub fn sessions(&self) -> &Arc<dyn SessionBackend> {
        &self.sessions
    }

    /// The event store, when one is bound.
    pub fn event_store(&self) -> Option<&Arc<dyn EventStore>> {
        self.events.as_ref()
    }

    /// The sandbox capability, when one is bound.
    pub fn sandbox(&self) -> Option<&Arc<dyn Sandbox>> {
        self.sandbox.as_ref()
    }

    /// Runs one conversational turn, returning its event stream.
    ///
    /// `input` is plain text or mixed content blocks; it is validated
    /// before any provider call and rejected with
    /// [`Error::InvalidInput`] when empty or carrying oversized /
    /// unsupported attachments, leaving history untouched. When
    /// `stream_id` is non-empty and an event store is bound, every event
    /// is also appended there for later resumption.
    pub async fn stream_message(
        &self,
        input: impl Into<UserInput>,
        session_id: impl Into<String>,
        stream_id: Option<String>,
    ) -> Result<EventStream> {
        let blocks = input.into().into_validated_blocks()?;
        let session_id = session_id.into();
        let stream_id = stream_id.filter(|id| !id.is_empty());

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let ctx = LoopCtx {
            config: self.config.clone(),
            provider: self.provider.clone(),
            sessions: self.sessions.clone(),
            events: self.events.clone(),
            tools: self.tools.clone(),
            skills: self.skills.clone(),
            session_id,
            emitter: Emitter {
                tx,
                store: self.events.clone(),
                stream_id,
            },
        };
        tokio::spawn(run_turn(ctx, blocks));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    config: AgentCoreConfig,
    provider: Option<Arc<dyn Provider>>,
    sessions: Option<Arc<dyn SessionBackend>>,
    events: Option<Arc<dyn EventStore>>,
    tools: Option<Arc<ToolRegistry>>,
    skills: Option<Arc<SkillRegistry>>,
    sandbox: Option<Arc<dyn Sandbox>>,
}

impl AgentBuilder {
    /// Injects a provider. Defaults to an [`HttpProvider`] built from the
    /// config.
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Injects a session backend. Defaults to in-memory.
    pub fn session_backend(mut self, sessions: Arc<dyn SessionBackend>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Binds an event store for resumable streams.
    pub fn event_store(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    /// Injects a tool registry. Defaults to an empty registry.
    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Injects a skill registry. Defaults to an empty registry.
    pub fn skills(mut self, skills: Arc<SkillRegistry>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Binds a sandbox capability for tool handlers.
    pub fn sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Result<Agent> {
        let provider = match self.provider {
            Some(provider) => provider,
            None => Arc::new(HttpProvider::new(self.config.provider().clone())?),
        };
        Ok(Agent {
            config: self.config,
            provider,
            sessions: self
                .sessions
                .unwrap_or_else(|| Arc::new(InMemorySessionBackend::new())),
            events: self.events,
            tools: self.tools.unwrap_or_default(),
            skills: self.skills.unwrap_or_default(),
            sandbox: self.sandbox,
        })
    }
}

// ============================================================================
// LOOP INTERNALS
// ============================================================================

/// Everything one turn needs, owned so the producer task is `'static`.
struct LoopCtx {
    config: AgentCoreConfig,
    provider: Arc<dyn Provider>,
    sessions: Arc<dyn SessionBackend>,
    events: Option<Arc<dyn EventStore>>,
    tools: Arc<ToolRegistry>,
    skills: Arc<SkillRegistry>,
    session_id: String,
    emitter: Emitter,
}

/// The consumer dropped the stream.
struct Cancelled;

/// Emits one event to the caller and, when a stream is bound, to the
/// event store first; persistence is synchronous with emission so store
/// order always equals emission order.
struct Emitter {
    tx: mpsc::Sender<AgentEvent>,
    store: Option<Arc<dyn EventStore>>,
    stream_id: Option<String>,
}

impl Emitter {
    async fn emit(&self, event: AgentEvent) -> std::result::Result<(), Cancelled> {
        if let (Some(store), Some(id)) = (&self.store, &self.stream_id) {
            if let Err(e) = store.append(id, event.kind(), event.data()).await {
                log::warn!("event store append failed for stream '{id}': {e}");
            }
        }
        self.tx.send(event).await.map_err(|_| Cancelled)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// How one turn ended.
enum TurnEnd {
    /// `done` emitted.
    Done,
    /// Consumer went away; partial state already persisted.
    Cancelled,
    /// Fatal error; partial state already persisted.
    Fatal(Error),
}

async fn run_turn(ctx: LoopCtx, blocks: Vec<ContentBlock>) {
    let end = drive(&ctx, blocks).await;
    let stream_bound = ctx.emitter.stream_id.is_some() && ctx.events.is_some();

    match end {
        TurnEnd::Done => {
            if stream_bound {
                mark(&ctx, true).await;
            }
        }
        TurnEnd::Cancelled => {
            log::info!("turn cancelled by consumer (session '{}')", ctx.session_id);
            if stream_bound {
                mark(&ctx, false).await;
            }
        }
        TurnEnd::Fatal(error) => {
            log::error!("turn failed (session '{}'): {error}", ctx.session_id);
            let _ = ctx
                .emitter
                .emit(AgentEvent::Error {
                    error_type: error.kind().to_string(),
                    message: error.to_string(),
                })
                .await;
            if stream_bound {
                mark(&ctx, false).await;
            }
        }
    }
}

async fn mark(ctx: &LoopCtx, completed: bool) {
    let (Some(store), Some(id)) = (&ctx.events, &ctx.emitter.stream_id) else {
        return;
    };
    let result = if completed {
        store.mark_completed(id).await
    } else {
        store.mark_failed(id).await
    };
    if let Err(e) = result {
        log::warn!("failed to mark stream '{id}': {e}");
    }
}

async fn drive(ctx: &LoopCtx, blocks: Vec<ContentBlock>) -> TurnEnd {
    // Load durable state and persist the new user turn up front; a fatal
    // error before any assistant output leaves exactly this behind.
    let mut history = match ctx.sessions.load(&ctx.session_id).await {
        Ok(history) => history,
        Err(e) => return TurnEnd::Fatal(e),
    };
    history.push(Message::user_with_blocks(blocks));
    if let Err(e) = ctx.sessions.save(&ctx.session_id, &history).await {
        return TurnEnd::Fatal(e);
    }

    let mut context = ContextManager::new(
        ctx.config.context_window(),
        ctx.config.compact_threshold(),
    );
    match ctx.sessions.load_usage(&ctx.session_id).await {
        Ok(usage) => context.record_usage(&usage),
        Err(e) => return TurnEnd::Fatal(e),
    }

    let provider_cfg = ctx.config.provider();
    let retry_policy = RetryPolicy::new(
        provider_cfg.max_retries(),
        provider_cfg.retry_initial_delay(),
    );
    let system = ctx.skills.compose(ctx.config.system_prompt());
    let tool_defs = ctx.tools.definitions();
    let max_tokens = provider_cfg.max_tokens();

    for iteration in 0..ctx.config.max_iterations() {
        log::debug!(
            "iteration {iteration} (session '{}', {} messages)",
            ctx.session_id,
            history.len()
        );

        // 1. Compaction check.
        match context
            .maybe_compact(
                &mut history,
                ctx.provider.as_ref(),
                &system,
                &tool_defs,
                &retry_policy,
                max_tokens,
            )
            .await
        {
            Ok(Some(report)) => {
                if let Err(e) = ctx.sessions.save(&ctx.session_id, &history).await {
                    return TurnEnd::Fatal(e);
                }
                let event = AgentEvent::Compact {
                    phase: report.phase,
                    before_tokens: report.before_tokens,
                    after_tokens: report.after_tokens,
                };
                if ctx.emitter.emit(event).await.is_err() {
                    return TurnEnd::Cancelled;
                }
            }
            Ok(None) => {}
            Err(e) => return TurnEnd::Fatal(e),
        }

        // 2–3. Provider call with inline retry, then delta consumption.
        let mut stream = {
            let mut attempt = 0u32;
            loop {
                if ctx.emitter.is_closed() {
                    return TurnEnd::Cancelled;
                }
                let request = ProviderRequest {
                    messages: &history,
                    system: &system,
                    tools: &tool_defs,
                    max_tokens,
                };
                match ctx.provider.stream(request).await {
                    Ok(stream) => break stream,
                    Err(e) if e.is_retryable() && attempt < retry_policy.max_retries => {
                        let event = AgentEvent::Retry {
                            attempt,
                            max_retries: retry_policy.max_retries,
                            error_kind: e.kind().to_string(),
                        };
                        if ctx.emitter.emit(event).await.is_err() {
                            return TurnEnd::Cancelled;
                        }
                        tokio::time::sleep(retry_policy.delay_for(attempt)).await;
                        attempt += 1;
                    }
                    Err(e) => return TurnEnd::Fatal(e),
                }
            }
        };

        let mut turn_text = String::new();
        let mut preamble_emitted = false;
        let mut final_ = None;
        loop {
            let delta = tokio::select! {
                delta = stream.next() => delta,
                _ = ctx.emitter.closed() => {
                    drop(stream);
                    persist_partial(ctx, &mut history, &turn_text).await;
                    return TurnEnd::Cancelled;
                }
            };
            match delta {
                Some(Ok(StreamDelta::Text(text))) => {
                    turn_text.push_str(&text);
                    if ctx.emitter.emit(AgentEvent::Token { text }).await.is_err() {
                        drop(stream);
                        persist_partial(ctx, &mut history, &turn_text).await;
                        return TurnEnd::Cancelled;
                    }
                }
                Some(Ok(StreamDelta::ToolUseStarted { .. })) => {
                    if !turn_text.is_empty() && !preamble_emitted {
                        preamble_emitted = true;
                        if ctx.emitter.emit(AgentEvent::PreambleEnd).await.is_err() {
                            drop(stream);
                            persist_partial(ctx, &mut history, &turn_text).await;
                            return TurnEnd::Cancelled;
                        }
                    }
                }
                Some(Ok(StreamDelta::Final(f))) => {
                    final_ = Some(f);
                    break;
                }
                Some(Err(e)) => {
                    drop(stream);
                    persist_partial(ctx, &mut history, &turn_text).await;
                    return TurnEnd::Fatal(e);
                }
                None => break,
            }
        }
        let Some(final_) = final_ else {
            persist_partial(ctx, &mut history, &turn_text).await;
            return TurnEnd::Fatal(Error::provider("stream ended without a final message"));
        };

        context.record_usage(&final_.usage);
        if let Err(e) = ctx.sessions.save_usage(&ctx.session_id, &final_.usage).await {
            return TurnEnd::Fatal(e);
        }

        // 4. Terminal decision. A turn with no tool uses is terminal
        // whatever the stop reason (`max_tokens` without tool use reads as
        // `end_turn`); a turn carrying tool uses always fans out so no
        // `tool_use` is ever persisted without its `tool_result`.
        let tool_uses: Vec<ToolUseBlock> = final_
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        if tool_uses.is_empty() {
            history.push(Message::assistant(final_.content));
            if let Err(e) = ctx.sessions.save(&ctx.session_id, &history).await {
                return TurnEnd::Fatal(e);
            }
            if ctx.emitter.emit(AgentEvent::Done).await.is_err() {
                return TurnEnd::Cancelled;
            }
            return TurnEnd::Done;
        }

        // 5. Tool fan-out.
        for tool_use in &tool_uses {
            let event = AgentEvent::ToolCall {
                name: tool_use.name.clone(),
                status: ToolCallStatus::Started,
                summary: summarize_call(&tool_use.name, &tool_use.input),
                error: None,
            };
            if ctx.emitter.emit(event).await.is_err() {
                persist_partial(ctx, &mut history, &turn_text).await;
                return TurnEnd::Cancelled;
            }
        }

        let executions = tokio::select! {
            executions = ctx.tools.execute_many(&tool_uses) => executions,
            _ = ctx.emitter.closed() => {
                persist_partial(ctx, &mut history, &turn_text).await;
                return TurnEnd::Cancelled;
            }
        };

        let mut results = Vec::with_capacity(executions.len());
        for (tool_use, execution) in tool_uses.iter().zip(executions) {
            let (status, error) = if execution.is_error {
                (
                    ToolCallStatus::Failed,
                    Some(execution.content.as_text()),
                )
            } else {
                (ToolCallStatus::Completed, None)
            };
            let event = AgentEvent::ToolCall {
                name: tool_use.name.clone(),
                status,
                summary: summarize_call(&tool_use.name, &tool_use.input),
                error,
            };
            if ctx.emitter.emit(event).await.is_err() {
                persist_partial(ctx, &mut history, &turn_text).await;
                return TurnEnd::Cancelled;
            }
            results.push(ContentBlock::ToolResult(ToolResultBlock {
                tool_use_id: tool_use.id.clone(),
                content: execution.content,
                is_error: execution.is_error,
            }));
        }

        history.push(Message::assistant(final_.content));
        history.push(Message::user_with_blocks(results));
        if let Err(e) = ctx.sessions.save(&ctx.session_id, &history).await {
            return TurnEnd::Fatal(e);
        }
    }

    // Iteration cap: synthesize a terminal turn instead of erroring.
    log::warn!(
        "max iterations ({}) reached for session '{}'",
        ctx.config.max_iterations(),
        ctx.session_id
    );
    history.push(Message::assistant_text("[max iterations reached]"));
    if let Err(e) = ctx.sessions.save(&ctx.session_id, &history).await {
        return TurnEnd::Fatal(e);
    }
    if ctx.emitter.emit(AgentEvent::Done).await.is_err() {
        return TurnEnd::Cancelled;
    }
    TurnEnd::Done
}

/// Persists streamed-but-unfinished assistant text as its own turn so the
/// resumable-stream contract holds across failures and cancellation.
async fn persist_partial(ctx: &LoopCtx, history: &mut Vec<Message>, turn_text: &str) {
    if turn_text.is_empty() {
        return;
    }
    history.push(Message::assistant_text(turn_text.to_string()));
    if let Err(e) = ctx.sessions.save(&ctx.session_id, history).await {
        log::warn!(
            "failed to persist partial assistant turn for session '{}': {e}",
            ctx.session_id
        );
    }
}
