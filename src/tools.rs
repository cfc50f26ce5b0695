//! Tool definition, registration, and dispatch.
//!
//! # Architecture
//!
//! A [`Tool`] pairs metadata (name, description, JSON-Schema input) with an
//! async handler. The [`ToolRegistry`] owns every tool an agent can call,
//! enforces name uniqueness, validates inputs against the declared schema
//! before dispatch, and wraps handler failures into `is_error` results so a
//! failed tool never aborts the loop.
//!
//! # Oversized results
//!
//! Handlers returning a *string* longer than the registry's
//! `max_result_chars` are paginated: the full string lands in a per-registry
//! scratch table keyed by an opaque random `result_id`, and the model gets
//! page 1 plus a footer telling it how to read on. The footer string is part
//! of the tool ABI and is emitted verbatim:
//!
//! ```text
//! \n\n[Page 1/N] — call read_more(result_id=..., page=K) for more
//! ```
//!
//! The `read_more` tool is auto-registered on every registry. Pages are
//! 1-indexed character windows; reading every page in order and stripping
//! footers reconstructs the original string exactly. Block-structured
//! results are never paginated.
//!
//! # Handlers
//!
//! Handlers are stored as `Arc<dyn Fn(Value) -> Pin<Box<dyn Future>>>`:
//! boxing erases each handler's concrete future type so different tools
//! live in one collection, and the `Send + Sync` bounds let one registry
//! serve concurrent loop iterations.
//!
//! # Examples
//!
//! ```rust
//! use agent_core::{tool, ToolOutput};
//!
//! let weather = tool("get_weather", "Get current weather for a location")
//!     .param("location", "string")
//!     .build(|args| async move {
//!         let location = args["location"].as_str().unwrap_or("unknown");
//!         Ok(ToolOutput::text(format!("22C and sunny in {location}")))
//!     });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;

use crate::config::ToolRegistryOptions;
use crate::types::{ContentBlock, ToolDescriptor, ToolResultContent, ToolUseBlock};
use crate::{Error, Result};

/// Name of the auto-registered pagination tool; reserved on every registry.
pub const READ_MORE_TOOL: &str = "read_more";

/// What a tool handler produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Plain string; subject to pagination.
    Text(String),
    /// Structured content blocks; passed through verbatim.
    Blocks(Vec<ContentBlock>),
}

impl ToolOutput {
    /// Convenience constructor for a text output.
    pub fn text(text: impl Into<String>) -> Self {
        ToolOutput::Text(text.into())
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        ToolOutput::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        ToolOutput::Text(s.to_string())
    }
}

/// Type alias for tool handler functions.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<ToolOutput>> + Send>> + Send + Sync>;

/// Where a registered tool came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    /// Registered directly by the integrator.
    Native,
    /// Bundled with a skill.
    Skill,
    /// Adapted from an MCP server; names carry the `<server>__` prefix.
    Mcp,
    /// The built-in subagent spawn tool.
    Subagent,
}

impl ToolSource {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolSource::Native => "native",
            ToolSource::Skill => "skill",
            ToolSource::Mcp => "mcp",
            ToolSource::Subagent => "subagent",
        }
    }
}

/// A tool definition: metadata plus an async handler.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

impl Tool {
    /// Creates a new tool.
    ///
    /// The schema accepts either full JSON Schema (an object with `"type"`
    /// and `"properties"`, passed through as-is) or the simple notation
    /// `{"param": "string", ...}` which is normalized to JSON Schema with
    /// every parameter required.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: normalize_schema(input_schema),
            handler: Arc::new(move |input| Box::pin(handler(input))),
        }
    }

    /// The tool's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tool's description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The tool's normalized input schema.
    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Runs the handler directly, without registry validation or
    /// pagination.
    pub async fn execute(&self, input: Value) -> Result<ToolOutput> {
        (self.handler)(input).await
    }

    /// The wire-level view of this tool.
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Normalizes simple `{"param": "type"}` notation into full JSON Schema;
/// passes real schemas through untouched.
fn normalize_schema(schema: Value) -> Value {
    let Some(map) = schema.as_object() else {
        return serde_json::json!({"type": "object", "properties": {}});
    };

    if map.contains_key("type") && map.contains_key("properties") {
        return schema;
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (key, value) in map {
        match value {
            Value::String(type_name) => {
                properties.insert(key.clone(), serde_json::json!({"type": type_name}));
                required.push(Value::String(key.clone()));
            }
            Value::Object(prop) => {
                let optional = prop.get("optional").and_then(Value::as_bool).unwrap_or(false)
                    || prop.get("required").and_then(Value::as_bool) == Some(false);
                let mut prop = prop.clone();
                prop.remove("optional");
                prop.remove("required");
                properties.insert(key.clone(), Value::Object(prop));
                if !optional {
                    required.push(Value::String(key.clone()));
                }
            }
            other => {
                properties.insert(key.clone(), other.clone());
                required.push(Value::String(key.clone()));
            }
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Builder for tools using the simple parameter notation.
pub struct ToolBuilder {
    name: String,
    description: String,
    properties: serde_json::Map<String, Value>,
    required: Vec<Value>,
}

/// Starts a [`ToolBuilder`].
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder {
        name: name.into(),
        description: description.into(),
        properties: serde_json::Map::new(),
        required: Vec::new(),
    }
}

impl ToolBuilder {
    /// Adds a required parameter with a JSON type name.
    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let name = name.into();
        let type_name: String = type_name.into();
        self.properties
            .insert(name.clone(), serde_json::json!({"type": type_name}));
        self.required.push(Value::String(name));
        self
    }

    /// Adds an optional parameter with a JSON type name.
    pub fn optional_param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name: String = type_name.into();
        self.properties
            .insert(name.into(), serde_json::json!({"type": type_name}));
        self
    }

    /// Finalizes the tool with its handler.
    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        let schema = serde_json::json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        });
        Tool::new(self.name, self.description, schema, handler)
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Outcome of one registry dispatch. Never an `Err`: handler failures are
/// folded into an `is_error` result per the tool-result contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    /// The result payload handed back to the model.
    pub content: ToolResultContent,
    /// Whether the dispatch failed.
    pub is_error: bool,
}

impl ToolExecution {
    fn ok(content: ToolResultContent) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            content: ToolResultContent::Text(message.into()),
            is_error: true,
        }
    }
}

struct RegisteredTool {
    tool: Tool,
    source: ToolSource,
}

struct PaginationEntry {
    full: String,
    page_size: usize,
    #[allow(dead_code)]
    created_at: Instant,
}

/// Registry of every tool an agent can dispatch.
///
/// Registration is expected to happen at construction time; dispatch is
/// safe from concurrent loop iterations. The pagination scratch table
/// lives as long as the registry.
pub struct ToolRegistry {
    options: ToolRegistryOptions,
    tools: Mutex<Vec<Arc<RegisteredTool>>>,
    pagination: Mutex<HashMap<String, PaginationEntry>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(ToolRegistryOptions::default())
    }
}

impl ToolRegistry {
    /// Creates a registry with the given options.
    pub fn new(options: ToolRegistryOptions) -> Self {
        Self {
            options,
            tools: Mutex::new(Vec::new()),
            pagination: Mutex::new(HashMap::new()),
        }
    }

    /// The registry options.
    pub fn options(&self) -> ToolRegistryOptions {
        self.options
    }

    /// Registers a tool with source `native`.
    pub fn register(&self, tool: Tool) -> Result<()> {
        self.register_with_source(tool, ToolSource::Native)
    }

    /// Registers a tool under an explicit source tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTool`] when the name is already taken
    /// (including the reserved `read_more` name).
    pub fn register_with_source(&self, tool: Tool, source: ToolSource) -> Result<()> {
        if tool.name() == READ_MORE_TOOL {
            return Err(Error::DuplicateTool(READ_MORE_TOOL.to_string()));
        }
        let mut tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        if tools.iter().any(|t| t.tool.name() == tool.name()) {
            return Err(Error::DuplicateTool(tool.name().to_string()));
        }
        log::debug!("registered tool '{}' (source {})", tool.name(), source.as_str());
        tools.push(Arc::new(RegisteredTool { tool, source }));
        Ok(())
    }

    /// The source tag of a registered tool, if present.
    pub fn source_of(&self, name: &str) -> Option<ToolSource> {
        if name == READ_MORE_TOOL {
            return Some(ToolSource::Native);
        }
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools
            .iter()
            .find(|t| t.tool.name() == name)
            .map(|t| t.source)
    }

    /// Wire-level definitions of every tool, in registration order, with
    /// the auto-registered `read_more` appended.
    pub fn definitions(&self) -> Vec<ToolDescriptor> {
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        let mut defs: Vec<ToolDescriptor> = tools.iter().map(|t| t.tool.descriptor()).collect();
        defs.push(ToolDescriptor {
            name: READ_MORE_TOOL.to_string(),
            description: "Read a further page of a paginated tool result.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "result_id": {"type": "string"},
                    "page": {"type": "integer"},
                },
                "required": ["result_id", "page"],
            }),
        });
        defs
    }

    /// Names of every registered tool, in registration order, excluding
    /// `read_more`.
    pub fn names(&self) -> Vec<String> {
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools.iter().map(|t| t.tool.name().to_string()).collect()
    }

    /// Clones of every registered tool with its source tag, in
    /// registration order. Handlers are `Arc`-backed, so this is cheap;
    /// subagents use it to inherit a reduced toolset.
    pub fn snapshot(&self) -> Vec<(Tool, ToolSource)> {
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools
            .iter()
            .map(|t| (t.tool.clone(), t.source))
            .collect()
    }

    /// Dispatches one tool call. Always returns: unknown names, schema
    /// mismatches, and handler failures become `is_error` results.
    pub async fn execute(&self, name: &str, input: Value) -> ToolExecution {
        if name == READ_MORE_TOOL {
            return self.execute_read_more(&input);
        }

        let tool = {
            let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
            tools.iter().find(|t| t.tool.name() == name).cloned()
        };
        let Some(registered) = tool else {
            return ToolExecution::error(format!("tool '{name}' not found"));
        };

        if let Err(e) = validate_input(registered.tool.input_schema(), &input) {
            return ToolExecution::error(format!("invalid input for '{name}': {e}"));
        }

        match registered.tool.execute(input).await {
            Ok(ToolOutput::Text(text)) => ToolExecution::ok(self.paginate(text)),
            Ok(ToolOutput::Blocks(blocks)) => {
                ToolExecution::ok(ToolResultContent::Blocks(blocks))
            }
            Err(e) => {
                log::warn!("tool '{name}' failed: {e}");
                ToolExecution::error(e.to_string())
            }
        }
    }

    /// Dispatches every call concurrently, returning results in the order
    /// of the input list regardless of completion order.
    pub async fn execute_many(&self, calls: &[ToolUseBlock]) -> Vec<ToolExecution> {
        let futures = calls
            .iter()
            .map(|call| self.execute(&call.name, call.input.clone()));
        futures::future::join_all(futures).await
    }

    /// Drops every pagination entry.
    pub fn clear_pagination_store(&self) {
        self.pagination
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of live pagination entries.
    pub fn pagination_store_len(&self) -> usize {
        self.pagination
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Stores an oversized string and returns page 1; short strings pass
    /// through untouched.
    fn paginate(&self, text: String) -> ToolResultContent {
        let page_size = self.options.max_result_chars;
        if text.chars().count() <= page_size {
            return ToolResultContent::Text(text);
        }

        let result_id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();

        let page = render_page(&text, page_size, 1, &result_id)
            .unwrap_or_else(|e| e);

        let mut store = self.pagination.lock().unwrap_or_else(|e| e.into_inner());
        log::debug!(
            "paginated oversized tool result ({} chars) as {result_id}",
            text.chars().count()
        );
        store.insert(
            result_id,
            PaginationEntry {
                full: text,
                page_size,
                created_at: Instant::now(),
            },
        );
        ToolResultContent::Text(page)
    }

    fn execute_read_more(&self, input: &Value) -> ToolExecution {
        let Some(result_id) = input["result_id"].as_str() else {
            return ToolExecution::error("invalid input for 'read_more': result_id is required");
        };
        let Some(page) = input["page"].as_u64() else {
            return ToolExecution::error("invalid input for 'read_more': page is required");
        };

        let store = self.pagination.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = store.get(result_id) else {
            return ToolExecution::error("error: result not found or expired");
        };
        match render_page(&entry.full, entry.page_size, page as usize, result_id) {
            Ok(text) => ToolExecution::ok(ToolResultContent::Text(text)),
            Err(message) => ToolExecution::error(message),
        }
    }
}

/// Renders one 1-indexed page of `full` with the footer ABI. Returns
/// `Err` with the exact error string for out-of-range pages.
fn render_page(full: &str, page_size: usize, page: usize, result_id: &str) -> std::result::Result<String, String> {
    let chars: Vec<char> = full.chars().collect();
    let total = chars.len().div_ceil(page_size).max(1);
    if page == 0 || page > total {
        return Err("error: page out of range".to_string());
    }

    let start = (page - 1) * page_size;
    let end = (start + page_size).min(chars.len());
    let mut out: String = chars[start..end].iter().collect();

    if page == total {
        out.push_str(&format!("\n\n[Page {page}/{total}]"));
    } else {
        out.push_str(&format!(
            "\n\n[Page {page}/{total}] — call read_more(result_id={result_id}, page={}) for more",
            page + 1
        ));
    }
    Ok(out)
}

/// Validates `input` against the declared schema's `type`, `required`, and
/// per-property primitive types. Undeclared properties pass through.
fn validate_input(schema: &Value, input: &Value) -> std::result::Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !input.is_object() {
        return Err("expected an object".to_string());
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required {
            if let Some(name) = field.as_str() {
                if input.get(name).is_none() {
                    return Err(format!("missing required field '{name}'"));
                }
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, prop) in properties {
            let Some(value) = input.get(name) else {
                continue;
            };
            let Some(expected) = prop.get("type").and_then(Value::as_str) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(format!("field '{name}' must be of type {expected}"));
            }
        }
    }

    Ok(())
}

/// One-line rendering of a tool call for `tool_call` event summaries,
/// e.g. `read_file path=src/x.py`.
pub fn summarize_call(name: &str, input: &Value) -> String {
    const MAX_VALUE_CHARS: usize = 60;

    let Some(map) = input.as_object() else {
        return name.to_string();
    };
    let mut parts = vec![name.to_string()];
    for (key, value) in map {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let rendered: String = if rendered.chars().count() > MAX_VALUE_CHARS {
            let mut truncated: String = rendered.chars().take(MAX_VALUE_CHARS).collect();
            truncated.push('…');
            truncated
        } else {
            rendered
        };
        // Keep the summary on one line whatever the argument contains.
        let rendered = rendered.replace('\n', "\\n");
        parts.push(format!("{key}={rendered}"));
    }
    parts.join(" ")
}
