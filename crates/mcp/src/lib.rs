//! Client side of the tool worker protocol.
//!
//! This crate supervises a tool worker process, correlates newline-delimited
//! JSON requests and responses over its stdio, and turns the worker's tool
//! listing into an in-process [`ToolFacade`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp::{Channel, Supervisor};
//!
//! # async fn example() -> mcp::Result<()> {
//! // Reads ./.mcp.json to find the worker command.
//! let channel = Arc::new(Channel::new(Supervisor::new(".")));
//! channel.start().await?;
//! mcp::initialize(&channel).await?;
//!
//! let tools = mcp::list_tools(&channel).await?;
//! let facade = mcp::build_facade(&channel, tools);
//! let result = facade
//!     .invoke("read_file", serde_json::json!({ "path": "./README.md" }))
//!     .await?;
//! println!("{result}");
//!
//! channel.stop().await;
//! # Ok(())
//! # }
//! ```

mod channel;
mod config;
mod error;
mod facade;
mod protocol;
mod supervisor;

pub use channel::{Channel, ChannelState, DEFAULT_TIMEOUT, FrameBuffer, MAX_LINE_BYTES, PendingTable};
pub use config::{CONFIG_FILE, WorkerConfig};
pub use error::{Error, Result};
pub use facade::{InvokeFuture, Invoker, ToolEntry, ToolFacade, build_facade, initialize, list_tools};
pub use protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId, ServerInfo, ToolDescriptor,
};
pub use supervisor::{ExitInfo, STOP_GRACE_PERIOD, Supervisor, sanitize_search_path};
