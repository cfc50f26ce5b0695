//! Error types for the agent runtime.
//!
//! Every fallible operation in the crate returns [`Result`]. Provider
//! failures are normalized into a fixed taxonomy so the agent loop can
//! decide uniformly what is retriable and what must escalate as a single
//! `error` event.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Authentication or authorization rejected by the provider (401/403).
    #[error("provider auth error: {0}")]
    Auth(String),

    /// Malformed request rejected by the provider (400/422).
    #[error("provider bad request: {0}")]
    BadRequest(String),

    /// Provider rate limit hit (429).
    #[error("provider rate limited: {0}")]
    RateLimit(String),

    /// Provider-side failure (5xx).
    #[error("provider server error: {0}")]
    Server(String),

    /// Provider call timed out.
    #[error("provider timeout: {0}")]
    Timeout(String),

    /// Network-level failure reaching the provider.
    #[error("provider connection error: {0}")]
    Connection(String),

    /// Any other provider failure; not retriable.
    #[error("provider error: {0}")]
    Provider(String),

    /// Invalid caller input (empty message, oversized or unsupported attachment).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Tool execution error.
    #[error("tool error: {0}")]
    Tool(String),

    /// Tool name already registered.
    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    /// Skill name already registered.
    #[error("duplicate skill: {0}")]
    DuplicateSkill(String),

    /// Session backend failure.
    #[error("session error: {0}")]
    Session(String),

    /// Event store failure.
    #[error("event store error: {0}")]
    EventStore(String),

    /// Stream consumer went away; the loop shut down early.
    #[error("stream cancelled by consumer")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error from a persistent backend.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Other errors.
    #[error("error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new auth error.
    pub fn auth(msg: impl Into<String>) -> Self {
        Error::Auth(msg.into())
    }

    /// Create a new bad-request error.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    /// Create a new rate-limit error.
    pub fn rate_limit(msg: impl Into<String>) -> Self {
        Error::RateLimit(msg.into())
    }

    /// Create a new server error.
    pub fn server(msg: impl Into<String>) -> Self {
        Error::Server(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    /// Create a new generic provider error.
    pub fn provider(msg: impl Into<String>) -> Self {
        Error::Provider(msg.into())
    }

    /// Create a new invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new tool error.
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new session error.
    pub fn session(msg: impl Into<String>) -> Self {
        Error::Session(msg.into())
    }

    /// Create a new event store error.
    pub fn event_store(msg: impl Into<String>) -> Self {
        Error::EventStore(msg.into())
    }

    /// Create a new config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Whether a retry with backoff may succeed.
    ///
    /// Rate limits, server errors, timeouts, and network failures are
    /// transient; everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimit(_) | Error::Server(_) | Error::Timeout(_) | Error::Connection(_)
        )
    }

    /// Stable snake_case kind string used in `retry` and `error` event
    /// payloads. Part of the wire contract; do not rename values.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Auth(_) => "auth",
            Error::BadRequest(_) => "bad_request",
            Error::RateLimit(_) => "rate_limit",
            Error::Server(_) => "server_error",
            Error::Timeout(_) => "timeout",
            Error::Connection(_) => "connection",
            Error::Provider(_) => "provider",
            Error::InvalidInput(_) => "invalid_input",
            Error::Tool(_) => "tool",
            Error::DuplicateTool(_) => "duplicate_tool",
            Error::DuplicateSkill(_) => "duplicate_skill",
            Error::Session(_) => "session",
            Error::EventStore(_) => "event_store",
            Error::Cancelled => "cancelled",
            Error::Config(_) => "config",
            Error::Json(_) => "json",
            Error::Sqlite(_) => "sqlite",
            Error::Other(_) => "other",
        }
    }
}
