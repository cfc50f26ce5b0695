//! MCP (Model Context Protocol) tool adaptation.
//!
//! The core does not discover MCP servers; it consumes an [`MCPClient`]
//! capability supplied by the caller and treats the server's tools as just
//! another tool source. [`McpToolAdapter::bind`] lists the server's tools
//! and registers each under `<server_name>__<tool_name>` (double
//! underscore is the literal separator in the naming contract), tagged
//! `mcp`, dispatching execution back through [`MCPClient::call_tool`].
//!
//! Two servers exporting the same tool name collide on the prefix only;
//! two *clients with the same server name* collide outright, and the
//! second registration fails with a duplicate-tool error: the integrator
//! renames or namespaces, the core never renames silently.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolOutput, ToolRegistry, ToolSource};
use crate::types::ToolDescriptor;
use crate::Result;

/// Connection to one MCP server.
#[async_trait]
pub trait MCPClient: Send + Sync {
    /// The server's name; becomes the tool-name prefix.
    fn server_name(&self) -> &str;

    /// Lists the server's tools.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invokes one tool on the server.
    async fn call_tool(&self, name: &str, args: Value) -> Result<ToolOutput>;

    /// Closes the connection.
    async fn close(&self) -> Result<()>;
}

/// Registers an MCP server's tools on a [`ToolRegistry`].
pub struct McpToolAdapter;

impl McpToolAdapter {
    /// Lists `client`'s tools and registers each one prefixed with
    /// `<server_name>__`, returning how many were added.
    pub async fn bind(client: Arc<dyn MCPClient>, registry: &ToolRegistry) -> Result<usize> {
        let descriptors = client.list_tools().await?;
        let count = descriptors.len();
        for descriptor in descriptors {
            let prefixed = format!("{}__{}", client.server_name(), descriptor.name);
            let remote_name = descriptor.name;
            let dispatch_client = client.clone();
            let tool = Tool::new(
                prefixed,
                descriptor.description,
                descriptor.input_schema,
                move |input| {
                    let client = dispatch_client.clone();
                    let name = remote_name.clone();
                    async move { client.call_tool(&name, input).await }
                },
            );
            registry.register_with_source(tool, ToolSource::Mcp)?;
        }
        log::info!(
            "bound {count} tools from MCP server '{}'",
            client.server_name()
        );
        Ok(count)
    }
}
