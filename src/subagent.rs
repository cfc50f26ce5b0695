//! The built-in `create_subagent` tool.
//!
//! When the model invokes it, a child agent runs the given task to
//! completion inside the parent's tool call and only its final text comes
//! back as the tool result; none of the child's events reach the outer
//! stream. The child:
//!
//! - shares the parent's provider and sandbox;
//! - inherits the parent's tools minus `create_subagent` itself, so
//!   recursion stops at one level;
//! - owns an independent, empty in-memory conversation.
//!
//! The child holds references only to parent-owned capabilities, never to
//! the parent agent itself; the parent→child relation is a one-way value.

use std::sync::{Arc, Weak};

use futures::StreamExt;
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::agent::Agent;
use crate::session::{InMemorySessionBackend, SessionBackend};
use crate::tools::{Tool, ToolOutput, ToolRegistry, ToolSource};
use crate::types::MessageRole;
use crate::{Error, Result};

/// Name of the built-in spawn tool.
pub const SUBAGENT_TOOL: &str = "create_subagent";

impl Agent {
    /// Registers the built-in `create_subagent` tool on this agent's
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTool`] if the name is already taken.
    pub fn register_subagent_tool(&self) -> Result<()> {
        let config = self.config.clone();
        let provider = self.provider.clone();
        let skills = self.skills.clone();
        let sandbox = self.sandbox.clone();
        // Weak: the handler lives inside the registry it reads from.
        let registry: Weak<ToolRegistry> = Arc::downgrade(&self.tools);

        let tool = Tool::new(
            SUBAGENT_TOOL,
            "Spawn a one-shot subagent with the current toolset to work on a bounded subtask; \
             returns the subagent's final answer.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "task": {
                        "type": "string",
                        "description": "Complete, self-contained description of the subtask",
                    },
                },
                "required": ["task"],
            }),
            move |input| {
                let config = config.clone();
                let provider = provider.clone();
                let skills = skills.clone();
                let sandbox = sandbox.clone();
                let registry = registry.clone();
                async move {
                    let task = input["task"]
                        .as_str()
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .ok_or_else(|| Error::tool("task must be a non-empty string"))?
                        .to_string();

                    let parent_tools = registry
                        .upgrade()
                        .ok_or_else(|| Error::tool("parent tool registry is gone"))?;

                    // Inherit everything except the spawn tool itself:
                    // exactly one level of recursion.
                    let child_tools = ToolRegistry::new(parent_tools.options());
                    for (tool, source) in parent_tools.snapshot() {
                        if tool.name() != SUBAGENT_TOOL {
                            child_tools.register_with_source(tool, source)?;
                        }
                    }

                    let sessions: Arc<dyn SessionBackend> =
                        Arc::new(InMemorySessionBackend::new());
                    let child = Agent {
                        config,
                        provider,
                        sessions: sessions.clone(),
                        events: None,
                        tools: Arc::new(child_tools),
                        skills,
                        sandbox,
                    };

                    let session_id: String = {
                        let suffix: String = rand::thread_rng()
                            .sample_iter(&Alphanumeric)
                            .take(8)
                            .map(char::from)
                            .collect();
                        format!("subagent-{suffix}")
                    };
                    log::debug!("spawning subagent session '{session_id}'");

                    // Drain the child's events without forwarding them.
                    let mut events = child.stream_message(task, session_id.clone(), None).await?;
                    let mut failure: Option<String> = None;
                    while let Some(event) = events.next().await {
                        if let crate::types::AgentEvent::Error { message, .. } = event {
                            failure = Some(message);
                        }
                    }
                    if let Some(message) = failure {
                        return Err(Error::tool(format!("subagent failed: {message}")));
                    }

                    let history = sessions.load(&session_id).await?;
                    let answer = history
                        .iter()
                        .rev()
                        .find(|m| m.role == MessageRole::Assistant)
                        .map(|m| m.text())
                        .unwrap_or_default();
                    Ok(ToolOutput::Text(answer))
                }
            },
        );

        self.tools.register_with_source(tool, ToolSource::Subagent)
    }
}
