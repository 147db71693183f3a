//! Modules bound into the script engine.
//!
//! Every name a script can reach is registered here: the `tools` module
//! built from the facade, the host utility modules `fs`, `process` and
//! `time`, and any capability groups the embedder adds.

mod fs;
mod process;
mod time;
mod tools;

use crate::context::ExecutionContext;
use policy::{CapabilityRequest, Policy};
use rhai::{Dynamic, Engine, EvalAltResult, Module, ModuleResolver, Position, Shared};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

pub use tools::script_name;
pub(crate) use tools::tools_module;

pub(crate) type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Names of the built-in host utility modules.
pub const HOST_MODULES: &[&str] = &["fs", "process", "time"];

/// An optional, embedder-provided script module.
#[derive(Debug, Clone)]
pub struct CapabilityGroup {
    name: String,
    module: Shared<Module>,
}

impl CapabilityGroup {
    pub fn new(name: impl Into<String>, module: Module) -> Self {
        Self {
            name: name.into(),
            module: Shared::new(module),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn module(&self) -> Shared<Module> {
        Shared::clone(&self.module)
    }
}

/// State shared by the host utility functions of one execution.
pub(crate) struct Host {
    pub context: ExecutionContext,
    pub policy: Policy,
    pub started: Instant,
}

impl Host {
    /// Check a capability, turning a denial into a script error.
    pub fn require(&self, request: CapabilityRequest) -> ScriptResult<()> {
        self.policy
            .check(&request)
            .into_result()
            .map_err(|e| runtime_error(e.to_string()))
    }

    /// Path as checked by the policy: project-relative when inside the root.
    pub fn scope(&self, path: &str) -> String {
        let root = &self.context.project_root;
        match std::path::Path::new(path).strip_prefix(root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => path.to_string(),
        }
    }
}

/// Host utility modules for one execution.
pub(crate) fn host_modules(host: &Arc<Host>) -> BTreeMap<String, Shared<Module>> {
    let mut modules = BTreeMap::new();
    modules.insert("fs".to_string(), Shared::new(fs::module(host)));
    modules.insert("process".to_string(), Shared::new(process::module(host)));
    modules.insert("time".to_string(), Shared::new(time::module(host)));
    modules
}

/// Resolves `import` paths against bound modules only.
pub(crate) struct BoundModules {
    modules: BTreeMap<String, Shared<Module>>,
}

impl BoundModules {
    pub fn new(modules: BTreeMap<String, Shared<Module>>) -> Self {
        Self { modules }
    }
}

impl ModuleResolver for BoundModules {
    fn resolve(
        &self,
        _engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> ScriptResult<Shared<Module>> {
        self.modules.get(path).cloned().ok_or_else(|| {
            let message = format!("capability not available: {path}");
            EvalAltResult::ErrorRuntime(Dynamic::from(message), pos).into()
        })
    }
}

pub(crate) fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    let message: String = message.into();
    EvalAltResult::ErrorRuntime(Dynamic::from(message), Position::NONE).into()
}

pub(crate) fn to_json(value: &Dynamic) -> ScriptResult<Value> {
    rhai::serde::from_dynamic(value)
}

pub(crate) fn from_json(value: Value) -> ScriptResult<Dynamic> {
    rhai::serde::to_dynamic(value)
}
