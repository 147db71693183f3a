//! Tool discovery and the in-process tool facade.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, ListToolsResult, METHOD_CALL_TOOL,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_LIST_TOOLS, ToolDescriptor, tool_error_text,
};

/// Future returned by an invoker.
pub type InvokeFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Uniform callable behind every facade entry.
pub type Invoker = Arc<dyn Fn(Value) -> InvokeFuture + Send + Sync>;

/// One tool in the facade.
#[derive(Clone)]
pub struct ToolEntry {
    pub descriptor: ToolDescriptor,
    pub invoker: Invoker,
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Name-keyed table of tool invokers.
///
/// Cloning is cheap; entries share their invokers.
#[derive(Debug, Clone, Default)]
pub struct ToolFacade {
    tools: BTreeMap<String, ToolEntry>,
}

impl ToolFacade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any earlier entry with the same name.
    pub fn insert(&mut self, descriptor: ToolDescriptor, invoker: Invoker) {
        if self.tools.contains_key(&descriptor.name) {
            debug!(tool = %descriptor.name, "duplicate tool name, keeping the later descriptor");
        }
        self.tools
            .insert(descriptor.name.clone(), ToolEntry { descriptor, invoker });
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ToolEntry> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Call a tool by name.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;
        (entry.invoker)(arguments).await
    }
}

/// Perform the `initialize` handshake.
pub async fn initialize(channel: &Channel) -> Result<InitializeResult> {
    let result: InitializeResult = channel
        .request(METHOD_INITIALIZE, InitializeParams::default())
        .await?;
    channel.notify(METHOD_INITIALIZED, None).await?;

    let server = result
        .server_info
        .as_ref()
        .map(|info| info.name.as_str())
        .unwrap_or("unknown");
    info!(server, protocol = ?result.protocol_version, "worker initialized");
    Ok(result)
}

/// Fetch the worker's current tool descriptors.
pub async fn list_tools(channel: &Channel) -> Result<Vec<ToolDescriptor>> {
    let value = channel
        .send(METHOD_LIST_TOOLS, Value::Object(Default::default()))
        .await?;
    // A null or empty result means no tools.
    let result: ListToolsResult = if value.is_null() {
        ListToolsResult::default()
    } else {
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidResponse(format!("{METHOD_LIST_TOOLS}: {e}")))?
    };
    debug!(count = result.tools.len(), "tools listed");
    Ok(result.tools)
}

/// Build a facade whose invokers call tools by name over `channel`.
///
/// Arguments are passed through unvalidated; `inputSchema` is advisory.
pub fn build_facade(channel: &Arc<Channel>, descriptors: Vec<ToolDescriptor>) -> ToolFacade {
    let mut facade = ToolFacade::new();
    for descriptor in descriptors {
        let invoker = channel_invoker(Arc::clone(channel), descriptor.name.clone());
        facade.insert(descriptor, invoker);
    }
    facade
}

fn channel_invoker(channel: Arc<Channel>, name: String) -> Invoker {
    Arc::new(move |arguments: Value| -> InvokeFuture {
        let channel = Arc::clone(&channel);
        let name = name.clone();
        Box::pin(async move { call_tool(&channel, name, arguments).await })
    })
}

async fn call_tool(channel: &Channel, name: String, arguments: Value) -> Result<Value> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    let params = serde_json::to_value(CallToolParams { name, arguments })?;
    let result = channel.send(METHOD_CALL_TOOL, params).await?;

    if let Some(text) = tool_error_text(&result) {
        return Err(Error::ToolCallFailed(text));
    }
    Ok(result)
}
