//! Script execution harness.
//!
//! Each execution gets a fresh Rhai engine on a blocking thread. Scripts see
//! only what is bound here: the `tools` module, the host utility modules,
//! registered capability groups, and a constant `context` map.

use crate::config::Config;
use crate::context::ExecutionContext;
use crate::host::{self, BoundModules, CapabilityGroup, HOST_MODULES, Host};
use crate::result::{ExecutionResult, Metrics, ResourceSample};
use mcp::ToolFacade;
use policy::Policy;
use rhai::{Dynamic, Engine, EvalAltResult, Map, Module, Scope, Shared};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, warn};

type Logs = Arc<Mutex<Vec<String>>>;

/// Runs scripts against a tool facade.
#[derive(Debug, Clone)]
pub struct Harness {
    project_root: PathBuf,
    policy: Policy,
    script_timeout: Option<Duration>,
    groups: BTreeMap<String, CapabilityGroup>,
}

impl Harness {
    /// Harness with a permissive policy and no script time limit.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            policy: Policy::permissive(),
            script_timeout: None,
            groups: BTreeMap::new(),
        }
    }

    pub fn from_config(project_root: impl Into<PathBuf>, config: &Config) -> Self {
        Self::new(project_root)
            .with_policy(config.policy.clone())
            .with_script_timeout(config.script_timeout())
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Limit a script's wall-clock time.
    ///
    /// The limit is checked between engine operations only. A script blocked
    /// inside `time::sleep`, `process::run` or a tool call finishes that call
    /// first, so it can overrun the limit by the call's duration; tool calls
    /// are still bounded by the channel's request timeout.
    pub fn with_script_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.script_timeout = timeout;
        self
    }

    /// Register an optional capability group, importable by name.
    pub fn with_capability(mut self, group: CapabilityGroup) -> Self {
        if HOST_MODULES.contains(&group.name()) || group.name() == "tools" {
            warn!(group = group.name(), "capability group shadows a built-in module");
        }
        self.groups.insert(group.name().to_string(), group);
        self
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Run a script with a fresh execution context.
    pub async fn execute_code(&self, script: &str, facade: &ToolFacade) -> ExecutionResult {
        let context = ExecutionContext::new(&self.project_root);
        self.execute_with_context(script, facade, context).await
    }

    /// Run a script. Every failure is reported in the result.
    pub async fn execute_with_context(
        &self,
        script: &str,
        facade: &ToolFacade,
        context: ExecutionContext,
    ) -> ExecutionResult {
        let started = Instant::now();
        let before = ResourceSample::now();
        debug!(execution = %context.execution_id, "executing script");

        let context_map =
            rhai::serde::to_dynamic(&context).unwrap_or_else(|_| Dynamic::from(Map::new()));
        let host = Arc::new(Host {
            context,
            policy: self.policy.clone(),
            started,
        });
        let modules = self.bind(facade, &host);
        let logs: Logs = Arc::default();
        let deadline = self.script_timeout.map(|limit| started + limit);

        let script = script.to_string();
        let run_logs = Arc::clone(&logs);
        let outcome = tokio::task::spawn_blocking(move || {
            run_script(&script, modules, context_map, run_logs, deadline)
        })
        .await
        .unwrap_or_else(|e| Err(format!("script execution aborted: {e}")));

        let metrics = Metrics::between(started.elapsed(), &before, &ResourceSample::now());
        let captured = std::mem::take(&mut *logs.lock().unwrap_or_else(|e| e.into_inner()));

        match outcome {
            Ok(data) => {
                debug!(duration_ms = metrics.duration_ms, "script succeeded");
                ExecutionResult::success(data, captured, metrics)
            }
            Err(error) => {
                debug!(duration_ms = metrics.duration_ms, %error, "script failed");
                ExecutionResult::failure(error, captured, metrics)
            }
        }
    }

    fn bind(&self, facade: &ToolFacade, host: &Arc<Host>) -> BTreeMap<String, Shared<Module>> {
        let mut modules = host::host_modules(host);
        for (name, group) in &self.groups {
            modules.insert(name.clone(), group.module());
        }
        modules.insert(
            "tools".to_string(),
            Shared::new(host::tools_module(facade, &Handle::current())),
        );
        modules
    }
}

fn run_script(
    script: &str,
    modules: BTreeMap<String, Shared<Module>>,
    context: Dynamic,
    logs: Logs,
    deadline: Option<Instant>,
) -> Result<Value, String> {
    let engine = build_engine(modules, logs, deadline);
    let mut scope = Scope::new();
    scope.push_constant_dynamic("context", context);

    let ast = engine
        .compile(script)
        .map_err(|e| format!("syntax error: {e}"))?;
    let value = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
        .map_err(|e| error_message(&e))?;
    host::to_json(&value)
        .map_err(|e| format!("script result is not serializable: {}", error_message(&e)))
}

fn build_engine(
    modules: BTreeMap<String, Shared<Module>>,
    logs: Logs,
    deadline: Option<Instant>,
) -> Engine {
    let mut engine = Engine::new();

    for (name, module) in &modules {
        engine.register_static_module(name.as_str(), Shared::clone(module));
    }
    engine.set_module_resolver(BoundModules::new(modules));

    let print_logs = Arc::clone(&logs);
    engine.on_print(move |line| push_log(&print_logs, line.to_string()));
    engine.on_debug(move |line, _source, _pos| push_log(&logs, line.to_string()));

    if let Some(deadline) = deadline {
        engine.on_progress(move |_ops| {
            (Instant::now() >= deadline).then(|| Dynamic::from("script timed out".to_string()))
        });
    }

    engine
}

fn push_log(logs: &Logs, line: String) {
    logs.lock().unwrap_or_else(|e| e.into_inner()).push(line);
}

/// Message for a script error.
///
/// Thrown strings are used verbatim and thrown maps contribute their
/// `message` field. Errors raised inside function calls or modules are
/// unwrapped to the innermost cause.
pub fn error_message(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorRuntime(value, _) => thrown_message(value),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => error_message(inner),
        EvalAltResult::ErrorInModule(_, inner, _) => error_message(inner),
        EvalAltResult::ErrorTerminated(token, _) => thrown_message(token),
        EvalAltResult::ErrorFunctionNotFound(signature, _) => {
            match signature.strip_prefix("tools::") {
                Some(rest) => {
                    let name = rest.split([' ', '(']).next().unwrap_or(rest);
                    format!("tool not available: {name}")
                }
                None => err.to_string(),
            }
        }
        other => other.to_string(),
    }
}

fn thrown_message(value: &Dynamic) -> String {
    if let Some(map) = value.clone().try_cast::<Map>() {
        if let Some(message) = map.get("message") {
            return message.to_string();
        }
    }
    value.to_string()
}
