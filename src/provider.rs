//! Provider abstraction: one streaming call to an LLM.
//!
//! [`Provider`] is the seam between the agent loop and any model backend.
//! Implementations normalize backend-specific failures into the crate's
//! error taxonomy so the loop can classify retries uniformly:
//!
//! | Kind | Origin | Retriable |
//! |---|---|---|
//! | [`Error::Auth`] | 401/403 | no |
//! | [`Error::BadRequest`] | 400/422 | no |
//! | [`Error::RateLimit`] | 429 | yes |
//! | [`Error::Server`] | 5xx | yes |
//! | [`Error::Timeout`] | timeout | yes |
//! | [`Error::Connection`] | network | yes |
//! | [`Error::Provider`] | anything else | no |
//!
//! [`HttpProvider`] is the shipped implementation, speaking the streaming
//! messages API over reqwest + SSE. Streaming is cooperative: dropping the
//! returned stream closes the underlying connection and surfaces no
//! further events.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde_json::json;

use crate::config::ProviderConfig;
use crate::context::estimate_tokens;
use crate::sse::{DeltaAggregator, parse_sse_stream};
use crate::types::{Message, StreamDelta, StreamFinal, ToolDescriptor, UsageInfo};
use crate::{Error, Result};

/// Stream of deltas from one provider call.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

/// One provider call's inputs.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    /// Conversation history, oldest first.
    pub messages: &'a [Message],
    /// System prompt (may be empty).
    pub system: &'a str,
    /// Tools offered to the model.
    pub tools: &'a [ToolDescriptor],
    /// Output token budget.
    pub max_tokens: u32,
}

/// A streaming LLM backend.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// concurrently.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Starts a streaming call. The stream yields text deltas and tool-use
    /// notices, then exactly one [`StreamDelta::Final`].
    async fn stream(&self, request: ProviderRequest<'_>) -> Result<ProviderStream>;

    /// Non-streaming call; used for compaction summarization.
    async fn create(&self, request: ProviderRequest<'_>) -> Result<StreamFinal>;

    /// Counts prompt tokens. Precise when the backend exposes a counting
    /// endpoint; otherwise a local approximation.
    async fn count_tokens(
        &self,
        messages: &[Message],
        system: &str,
        tools: &[ToolDescriptor],
    ) -> Result<u64>;
}

// ============================================================================
// HTTP IMPLEMENTATION
// ============================================================================

const API_VERSION: &str = "2023-06-01";

/// Provider speaking the streaming messages API over HTTP.
pub struct HttpProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl HttpProvider {
    /// Builds a provider with a dedicated HTTP client using the configured
    /// per-call timeout.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::config(format!("failed to build http client: {e}")))?;
        Ok(Self { config, http })
    }

    /// The provider configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn request_body(&self, request: &ProviderRequest<'_>, stream: bool) -> Result<serde_json::Value> {
        let caching = self.config.enable_prompt_caching();

        // System prompt travels as a block list so the last block can carry
        // an ephemeral cache marker.
        let system = if request.system.is_empty() {
            serde_json::Value::Null
        } else {
            let mut block = json!({"type": "text", "text": request.system});
            if caching {
                block["cache_control"] = json!({"type": "ephemeral"});
            }
            json!([block])
        };

        let mut tools = Vec::with_capacity(request.tools.len());
        for descriptor in request.tools {
            tools.push(serde_json::to_value(descriptor)?);
        }
        if caching {
            if let Some(last) = tools.last_mut() {
                last["cache_control"] = json!({"type": "ephemeral"});
            }
        }

        let mut body = json!({
            "model": self.config.model(),
            "max_tokens": request.max_tokens,
            "messages": request.messages,
            "stream": stream,
        });
        if !system.is_null() {
            body["system"] = system;
        }
        if !tools.is_empty() {
            body["tools"] = serde_json::Value::Array(tools);
        }
        Ok(body)
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.config.base_url(), path);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", self.config.api_key())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(normalize_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response
            .text()
            .await
            .unwrap_or_else(|_| "no response body".to_string());
        Err(normalize_status(status, detail))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn stream(&self, request: ProviderRequest<'_>) -> Result<ProviderStream> {
        let body = self.request_body(&request, true)?;
        let response = self.post("/v1/messages", &body).await?;

        // Fold SSE frames through the aggregator; the logical stream ends
        // at the Final delta even if the transport lingers.
        let frames = parse_sse_stream(response);
        let deltas = frames
            .scan(DeltaAggregator::new(), |aggregator, frame| {
                let out = match frame {
                    Ok(event) => match aggregator.process(event) {
                        Ok(deltas) => deltas.into_iter().map(Ok).collect::<Vec<_>>(),
                        Err(e) => vec![Err(e)],
                    },
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(futures::stream::iter(out)))
            })
            .flatten();

        Ok(Box::pin(deltas))
    }

    async fn create(&self, request: ProviderRequest<'_>) -> Result<StreamFinal> {
        let body = self.request_body(&request, false)?;
        let response = self.post("/v1/messages", &body).await?;
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("malformed response body: {e}")))?;

        let content = serde_json::from_value(payload["content"].clone())?;
        let stop_reason = match payload["stop_reason"].as_str() {
            Some("tool_use") => crate::types::StopReason::ToolUse,
            Some("max_tokens") => crate::types::StopReason::MaxTokens,
            _ => crate::types::StopReason::EndTurn,
        };
        let usage = UsageInfo {
            input_tokens: payload["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: payload["usage"]["output_tokens"].as_u64().unwrap_or(0),
            cache_creation_input_tokens: payload["usage"]["cache_creation_input_tokens"]
                .as_u64()
                .unwrap_or(0),
            cache_read_input_tokens: payload["usage"]["cache_read_input_tokens"]
                .as_u64()
                .unwrap_or(0),
        };

        Ok(StreamFinal {
            content,
            stop_reason,
            usage,
        })
    }

    async fn count_tokens(
        &self,
        messages: &[Message],
        system: &str,
        tools: &[ToolDescriptor],
    ) -> Result<u64> {
        let request = ProviderRequest {
            messages,
            system,
            tools,
            max_tokens: 1,
        };
        let mut body = self.request_body(&request, false)?;
        if let Some(map) = body.as_object_mut() {
            map.remove("max_tokens");
            map.remove("stream");
        }

        match self.post("/v1/messages/count_tokens", &body).await {
            Ok(response) => {
                let payload: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| Error::provider(format!("malformed count response: {e}")))?;
                payload["input_tokens"]
                    .as_u64()
                    .ok_or_else(|| Error::provider("count response missing input_tokens"))
            }
            Err(e) => {
                // Counting is advisory; fall back to the local estimate
                // rather than failing the loop.
                log::debug!("token count endpoint unavailable ({e}), using local estimate");
                Ok(local_token_estimate(messages, system, tools))
            }
        }
    }
}

/// Character-based approximation used when precise counting is
/// unavailable: history estimate plus system prompt and tool schemas at
/// four characters per token.
pub fn local_token_estimate(messages: &[Message], system: &str, tools: &[ToolDescriptor]) -> u64 {
    let mut chars = system.len();
    for tool in tools {
        chars += tool.name.len() + tool.description.len();
        chars += tool.input_schema.to_string().len();
    }
    estimate_tokens(messages) + (chars as u64).div_ceil(4)
}

fn normalize_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(e.to_string())
    } else if e.is_connect() {
        Error::connection(e.to_string())
    } else {
        Error::connection(e.to_string())
    }
}

fn normalize_status(status: reqwest::StatusCode, detail: String) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth(detail),
        400 | 422 => Error::bad_request(detail),
        429 => Error::rate_limit(detail),
        500..=599 => Error::server(format!("{status}: {detail}")),
        _ => Error::provider(format!("{status}: {detail}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentBlock;

    fn provider() -> HttpProvider {
        let config = ProviderConfig::builder()
            .model("claude-sonnet-4-5")
            .api_key("sk-test")
            .build()
            .unwrap();
        HttpProvider::new(config).unwrap()
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    #[test]
    fn test_status_normalization() {
        use reqwest::StatusCode;
        assert!(matches!(
            normalize_status(StatusCode::UNAUTHORIZED, String::new()),
            Error::Auth(_)
        ));
        assert!(matches!(
            normalize_status(StatusCode::FORBIDDEN, String::new()),
            Error::Auth(_)
        ));
        assert!(matches!(
            normalize_status(StatusCode::BAD_REQUEST, String::new()),
            Error::BadRequest(_)
        ));
        assert!(matches!(
            normalize_status(StatusCode::UNPROCESSABLE_ENTITY, String::new()),
            Error::BadRequest(_)
        ));
        assert!(matches!(
            normalize_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            Error::RateLimit(_)
        ));
        assert!(matches!(
            normalize_status(StatusCode::BAD_GATEWAY, String::new()),
            Error::Server(_)
        ));
        assert!(matches!(
            normalize_status(StatusCode::IM_A_TEAPOT, String::new()),
            Error::Provider(_)
        ));
    }

    #[test]
    fn test_request_body_cache_markers() {
        let p = provider();
        let messages = vec![Message::user("hi")];
        let tools = vec![descriptor("read_file"), descriptor("grep")];
        let request = ProviderRequest {
            messages: &messages,
            system: "be helpful",
            tools: &tools,
            max_tokens: 1024,
        };

        let body = p.request_body(&request, true).unwrap();
        // Marker on the last system block and the last tool only.
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert!(body["tools"][0].get("cache_control").is_none());
        assert_eq!(body["tools"][1]["cache_control"]["type"], "ephemeral");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_request_body_without_caching() {
        let config = ProviderConfig::builder()
            .model("claude-sonnet-4-5")
            .api_key("sk-test")
            .enable_prompt_caching(false)
            .build()
            .unwrap();
        let p = HttpProvider::new(config).unwrap();

        let messages = vec![Message::user("hi")];
        let tools = vec![descriptor("read_file")];
        let request = ProviderRequest {
            messages: &messages,
            system: "be helpful",
            tools: &tools,
            max_tokens: 1024,
        };

        let body = p.request_body(&request, false).unwrap();
        assert!(body["system"][0].get("cache_control").is_none());
        assert!(body["tools"][0].get("cache_control").is_none());
    }

    #[test]
    fn test_request_body_omits_empty_sections() {
        let p = provider();
        let messages = vec![Message::user("hi")];
        let request = ProviderRequest {
            messages: &messages,
            system: "",
            tools: &[],
            max_tokens: 64,
        };
        let body = p.request_body(&request, false).unwrap();
        assert!(body.get("system").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_message_wire_shape() {
        let p = provider();
        let messages = vec![Message::assistant(vec![
            ContentBlock::text("checking"),
            ContentBlock::ToolUse(crate::types::ToolUseBlock::new(
                "toolu_1",
                "read_file",
                json!({"path": "a.rs"}),
            )),
        ])];
        let request = ProviderRequest {
            messages: &messages,
            system: "",
            tools: &[],
            max_tokens: 64,
        };
        let body = p.request_body(&request, false).unwrap();
        assert_eq!(body["messages"][0]["role"], "assistant");
        assert_eq!(body["messages"][0]["content"][1]["type"], "tool_use");
        assert_eq!(body["messages"][0]["content"][1]["input"]["path"], "a.rs");
    }

    #[test]
    fn test_local_token_estimate_counts_all_parts() {
        let messages = vec![Message::user("x".repeat(400))];
        let bare = local_token_estimate(&messages, "", &[]);
        let with_system = local_token_estimate(&messages, &"s".repeat(400), &[]);
        let with_tools = local_token_estimate(&messages, "", &[descriptor("read_file")]);
        assert!(with_system > bare);
        assert!(with_tools > bare);
    }
}
