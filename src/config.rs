//! Public configuration surface and the static model table.
//!
//! All configuration objects are immutable value objects constructed
//! through builders with validation; they are passed in at construction
//! time and never mutated by the running loop.
//!
//! # Examples
//!
//! ```rust
//! use agent_core::{AgentCoreConfig, ProviderConfig};
//!
//! let provider = ProviderConfig::builder()
//!     .model("claude-sonnet-4-5")
//!     .api_key("sk-...")
//!     .build()
//!     .unwrap();
//!
//! let config = AgentCoreConfig::builder(provider)
//!     .system_prompt("You are a helpful assistant")
//!     .max_iterations(10)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.context_window(), 200_000);
//! ```

use std::time::Duration;

use crate::{Error, Result};

// ============================================================================
// MODEL TABLE
// ============================================================================

/// Pricing and context-window data for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInfo {
    /// USD per million input tokens.
    pub input_usd_per_mtok: f64,
    /// USD per million output tokens.
    pub output_usd_per_mtok: f64,
    /// Context window in tokens.
    pub context_window: u64,
}

/// Context window assumed for models missing from the table.
pub const DEFAULT_CONTEXT_WINDOW: u64 = 200_000;

const MODEL_TABLE: &[(&str, ModelInfo)] = &[
    (
        "claude-opus-4-1",
        ModelInfo {
            input_usd_per_mtok: 15.0,
            output_usd_per_mtok: 75.0,
            context_window: 200_000,
        },
    ),
    (
        "claude-sonnet-4-5",
        ModelInfo {
            input_usd_per_mtok: 3.0,
            output_usd_per_mtok: 15.0,
            context_window: 200_000,
        },
    ),
    (
        "claude-sonnet-4-0",
        ModelInfo {
            input_usd_per_mtok: 3.0,
            output_usd_per_mtok: 15.0,
            context_window: 200_000,
        },
    ),
    (
        "claude-haiku-3-5",
        ModelInfo {
            input_usd_per_mtok: 0.8,
            output_usd_per_mtok: 4.0,
            context_window: 200_000,
        },
    ),
];

/// Looks up pricing and context-window data for a model id.
///
/// Dated aliases resolve to their base entry (`claude-sonnet-4-5-20250929`
/// matches `claude-sonnet-4-5`).
pub fn lookup_model(model: &str) -> Option<ModelInfo> {
    MODEL_TABLE
        .iter()
        .find(|(id, _)| model == *id || model.starts_with(&format!("{id}-")))
        .map(|(_, info)| *info)
}

/// The context window for a model, falling back to
/// [`DEFAULT_CONTEXT_WINDOW`] for unknown ids.
pub fn context_window_for(model: &str) -> u64 {
    lookup_model(model)
        .map(|info| info.context_window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

// ============================================================================
// PROVIDER CONFIG
// ============================================================================

/// Configuration for one LLM provider connection.
///
/// Construct with [`ProviderConfig::builder`]; `model` and `api_key` are
/// required, everything else has defaults.
#[derive(Clone)]
pub struct ProviderConfig {
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    timeout: Duration,
    enable_prompt_caching: bool,
    max_retries: u32,
    retry_initial_delay: Duration,
}

/// Masks the API key so config debug output is safe to log.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("model", &self.model)
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("enable_prompt_caching", &self.enable_prompt_caching)
            .field("max_retries", &self.max_retries)
            .field("retry_initial_delay", &self.retry_initial_delay)
            .finish()
    }
}

impl ProviderConfig {
    /// Creates a new builder.
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder::default()
    }

    /// Model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// API endpoint base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Per-response output token budget.
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Per-call HTTP timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether ephemeral prompt-cache markers are attached.
    pub fn enable_prompt_caching(&self) -> bool {
        self.enable_prompt_caching
    }

    /// Retry budget for transient failures.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff delay before the first retry; doubles each attempt.
    pub fn retry_initial_delay(&self) -> Duration {
        self.retry_initial_delay
    }
}

/// Builder for [`ProviderConfig`].
#[derive(Default)]
pub struct ProviderConfigBuilder {
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    max_tokens: Option<u32>,
    timeout: Option<Duration>,
    enable_prompt_caching: Option<bool>,
    max_retries: Option<u32>,
    retry_initial_delay: Option<Duration>,
}

impl ProviderConfigBuilder {
    /// Sets the model identifier (required).
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the API key (required).
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the API endpoint base URL. Defaults to the hosted endpoint.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the per-response output token budget (default 8192).
    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Sets the per-call HTTP timeout (default 60 s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enables or disables prompt-cache markers (default true).
    pub fn enable_prompt_caching(mut self, enable: bool) -> Self {
        self.enable_prompt_caching = Some(enable);
        self
    }

    /// Sets the retry budget for transient failures (default 3).
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the initial backoff delay (default 1 s).
    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.retry_initial_delay = Some(delay);
        self
    }

    /// Validates and builds the final config.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `model` or `api_key` is missing
    /// or blank, when `base_url` has no http(s) scheme, or when
    /// `max_tokens` is zero.
    pub fn build(self) -> Result<ProviderConfig> {
        let model = self.model.ok_or_else(|| Error::config("model is required"))?;
        if model.trim().is_empty() {
            return Err(Error::config("model cannot be empty or whitespace"));
        }

        let api_key = self
            .api_key
            .ok_or_else(|| Error::config("api_key is required"))?;
        if api_key.trim().is_empty() {
            return Err(Error::config("api_key cannot be empty or whitespace"));
        }

        let base_url = self
            .base_url
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::config(
                "base_url must start with http:// or https://",
            ));
        }

        let max_tokens = self.max_tokens.unwrap_or(8192);
        if max_tokens == 0 {
            return Err(Error::config("max_tokens must be greater than 0"));
        }

        Ok(ProviderConfig {
            model,
            api_key,
            base_url,
            max_tokens,
            timeout: self.timeout.unwrap_or(Duration::from_secs(60)),
            enable_prompt_caching: self.enable_prompt_caching.unwrap_or(true),
            max_retries: self.max_retries.unwrap_or(3),
            retry_initial_delay: self
                .retry_initial_delay
                .unwrap_or(Duration::from_secs(1)),
        })
    }
}

// ============================================================================
// AGENT CONFIG
// ============================================================================

/// Configuration for an [`crate::Agent`] instance.
#[derive(Debug, Clone)]
pub struct AgentCoreConfig {
    provider: ProviderConfig,
    system_prompt: String,
    max_iterations: u32,
    compact_threshold: f64,
    context_window: u64,
}

impl AgentCoreConfig {
    /// Creates a new builder around a provider config.
    pub fn builder(provider: ProviderConfig) -> AgentCoreConfigBuilder {
        AgentCoreConfigBuilder {
            provider,
            system_prompt: None,
            max_iterations: None,
            compact_threshold: None,
            context_window: None,
        }
    }

    /// The provider connection settings.
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Base system prompt, before skill enrichment.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Maximum loop iterations per turn.
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Context usage fraction that triggers compaction.
    pub fn compact_threshold(&self) -> f64 {
        self.compact_threshold
    }

    /// Context window in tokens.
    pub fn context_window(&self) -> u64 {
        self.context_window
    }
}

/// Builder for [`AgentCoreConfig`].
pub struct AgentCoreConfigBuilder {
    provider: ProviderConfig,
    system_prompt: Option<String>,
    max_iterations: Option<u32>,
    compact_threshold: Option<f64>,
    context_window: Option<u64>,
}

impl AgentCoreConfigBuilder {
    /// Sets the base system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the loop iteration cap (default 25).
    pub fn max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    /// Sets the compaction trigger threshold (default 0.8).
    pub fn compact_threshold(mut self, threshold: f64) -> Self {
        self.compact_threshold = Some(threshold);
        self
    }

    /// Overrides the context window. Defaults to the model-table lookup.
    pub fn context_window(mut self, tokens: u64) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// Validates and builds the final config.
    pub fn build(self) -> Result<AgentCoreConfig> {
        let max_iterations = self.max_iterations.unwrap_or(25);
        if max_iterations == 0 {
            return Err(Error::config("max_iterations must be greater than 0"));
        }

        let compact_threshold = self.compact_threshold.unwrap_or(0.8);
        if !(0.0..=1.0).contains(&compact_threshold) {
            return Err(Error::config(
                "compact_threshold must be between 0.0 and 1.0",
            ));
        }

        let context_window = self
            .context_window
            .unwrap_or_else(|| context_window_for(self.provider.model()));
        if context_window == 0 {
            return Err(Error::config("context_window must be greater than 0"));
        }

        Ok(AgentCoreConfig {
            provider: self.provider,
            system_prompt: self.system_prompt.unwrap_or_default(),
            max_iterations,
            compact_threshold,
            context_window,
        })
    }
}

// ============================================================================
// TOOL REGISTRY OPTIONS
// ============================================================================

/// Options for a [`crate::ToolRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct ToolRegistryOptions {
    /// Page size for oversized string results, in characters.
    pub max_result_chars: usize,
}

impl Default for ToolRegistryOptions {
    fn default() -> Self {
        Self {
            max_result_chars: 50_000,
        }
    }
}

impl ToolRegistryOptions {
    /// Overrides the pagination page size.
    pub fn with_max_result_chars(mut self, chars: usize) -> Self {
        self.max_result_chars = chars;
        self
    }
}
