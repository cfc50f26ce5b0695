//! Shared test doubles for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use agent_core::{
    AgentCoreConfig, AgentEvent, ContentBlock, Error, Message, Provider, ProviderConfig,
    ProviderRequest, ProviderStream, Result, StopReason, StreamDelta, StreamFinal, ToolDescriptor,
    ToolUseBlock, UsageInfo, estimate_tokens,
};

/// One scripted `stream()` outcome.
pub enum ScriptedCall {
    /// The call itself fails.
    Fail(Error),
    /// The call yields these deltas (must end with a `Final`).
    Stream(Vec<StreamDelta>),
}

/// What one provider call looked like, for assertions.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub system: String,
    pub message_count: usize,
    pub tool_names: Vec<String>,
    pub max_tokens: u32,
}

/// Provider double driven by a pre-loaded script of calls.
pub struct ScriptedProvider {
    calls: Mutex<VecDeque<ScriptedCall>>,
    create_responses: Mutex<VecDeque<StreamFinal>>,
    captured: Mutex<Vec<CapturedRequest>>,
}

impl ScriptedProvider {
    pub fn new(calls: Vec<ScriptedCall>) -> Self {
        Self {
            calls: Mutex::new(calls.into()),
            create_responses: Mutex::new(VecDeque::new()),
            captured: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response for the next `create()` call (compaction).
    pub fn push_create_response(&self, final_: StreamFinal) {
        self.create_responses.lock().unwrap().push_back(final_);
    }

    /// Every request seen so far.
    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.captured.lock().unwrap().clone()
    }

    fn capture(&self, request: &ProviderRequest<'_>) {
        self.captured.lock().unwrap().push(CapturedRequest {
            system: request.system.to_string(),
            message_count: request.messages.len(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            max_tokens: request.max_tokens,
        });
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn stream(&self, request: ProviderRequest<'_>) -> Result<ProviderStream> {
        self.capture(&request);
        let call = self
            .calls
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::other("scripted provider ran out of calls"))?;
        match call {
            ScriptedCall::Fail(error) => Err(error),
            ScriptedCall::Stream(deltas) => {
                Ok(Box::pin(futures::stream::iter(deltas.into_iter().map(Ok))))
            }
        }
    }

    async fn create(&self, request: ProviderRequest<'_>) -> Result<StreamFinal> {
        self.capture(&request);
        Ok(self
            .create_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| StreamFinal {
                content: vec![ContentBlock::text("summary of earlier work")],
                stop_reason: StopReason::EndTurn,
                usage: UsageInfo::default(),
            }))
    }

    async fn count_tokens(
        &self,
        messages: &[Message],
        _system: &str,
        _tools: &[ToolDescriptor],
    ) -> Result<u64> {
        Ok(estimate_tokens(messages))
    }
}

/// Usage with only input tokens set, for terse scripts.
pub fn usage(input_tokens: u64, output_tokens: u64) -> UsageInfo {
    UsageInfo {
        input_tokens,
        output_tokens,
        cache_creation_input_tokens: 0,
        cache_read_input_tokens: 0,
    }
}

/// Deltas for a text-only turn streamed in `chunks`.
pub fn text_turn(chunks: &[&str], usage: UsageInfo) -> ScriptedCall {
    let mut deltas: Vec<StreamDelta> = chunks
        .iter()
        .map(|c| StreamDelta::Text(c.to_string()))
        .collect();
    deltas.push(StreamDelta::Final(StreamFinal {
        content: vec![ContentBlock::text(chunks.concat())],
        stop_reason: StopReason::EndTurn,
        usage,
    }));
    ScriptedCall::Stream(deltas)
}

/// Deltas for a turn that streams optional preamble text then requests
/// tool calls.
pub fn tool_turn(preamble: Option<&str>, tool_uses: Vec<ToolUseBlock>, usage: UsageInfo) -> ScriptedCall {
    let mut deltas = Vec::new();
    let mut content = Vec::new();
    if let Some(text) = preamble {
        deltas.push(StreamDelta::Text(text.to_string()));
        content.push(ContentBlock::text(text));
    }
    for tool_use in &tool_uses {
        deltas.push(StreamDelta::ToolUseStarted {
            name: tool_use.name.clone(),
        });
    }
    content.extend(tool_uses.into_iter().map(ContentBlock::ToolUse));
    deltas.push(StreamDelta::Final(StreamFinal {
        content,
        stop_reason: StopReason::ToolUse,
        usage,
    }));
    ScriptedCall::Stream(deltas)
}

/// Standard test configuration around a dummy model.
pub fn test_config() -> AgentCoreConfig {
    let provider = ProviderConfig::builder()
        .model("claude-sonnet-4-5")
        .api_key("sk-test")
        .retry_initial_delay(std::time::Duration::from_millis(10))
        .build()
        .unwrap();
    AgentCoreConfig::builder(provider)
        .system_prompt("You are a test assistant")
        .build()
        .unwrap()
}

/// Drains an event stream into a vector.
pub async fn collect_events(mut events: agent_core::EventStream) -> Vec<AgentEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.next().await {
        out.push(event);
    }
    out
}

/// Concatenation of every token delta in `events`.
pub fn token_text(events: &[AgentEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Token { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Asserts the tool-pairing invariant over persisted history.
pub fn assert_tool_pairing(history: &[Message]) {
    for (i, message) in history.iter().enumerate() {
        let uses = message.tool_uses();
        if uses.is_empty() {
            continue;
        }
        let next = history
            .get(i + 1)
            .unwrap_or_else(|| panic!("tool_use turn {i} has no following turn"));
        let result_ids: Vec<&str> = next
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult(r) => Some(r.tool_use_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            uses.len(),
            result_ids.len(),
            "tool_use / tool_result count mismatch at turn {i}"
        );
        for use_ in uses {
            assert!(
                result_ids.contains(&use_.id.as_str()),
                "tool_use {} lacks a result",
                use_.id
            );
        }
    }
}
