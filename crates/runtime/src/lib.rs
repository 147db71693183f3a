//! Toolscript runtime: run scripts against a tool worker's tools.
//!
//! A [`Session`] owns the worker channel, performs the handshake, and hands
//! the resulting facade to the [`Harness`], which runs each script in a fresh
//! Rhai engine and reports an [`ExecutionResult`].
//!
//! Scripts reach tools as `tools::<name>(args)`, host utilities through the
//! `fs`, `process` and `time` modules, and optional embedder-provided
//! [`CapabilityGroup`]s through `import`. Host utilities are gated by a
//! [`policy::Policy`] that is permissive unless configured otherwise.
//!
//! # Example
//!
//! ```no_run
//! use runtime::Session;
//!
//! # async fn example() -> runtime::Result<()> {
//! let session = Session::new(".")?;
//! let result = session
//!     .execute_code(r#"tools::read_file(#{ path: "README.md" })"#)
//!     .await?;
//! if result.success {
//!     println!("{}", result.data);
//! } else {
//!     eprintln!("{}", result.error.unwrap_or_default());
//! }
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod error;
mod harness;
mod host;
mod result;
mod session;

pub use config::{CONFIG_FILE, Config};
pub use context::{EXECUTION_MARKER, ExecutionContext, HUSKY_MARKER, SKIP_HOOKS_MARKER};
pub use error::{Error, Result};
pub use harness::{Harness, error_message};
pub use host::{CapabilityGroup, HOST_MODULES, script_name};
pub use result::{ExecutionResult, Metrics, ResourceSample};
pub use session::Session;

// Script modules are built with this crate's engine types.
pub use rhai;
