//! The `process` module.
//!
//! Commands run in the project root with the execution markers added to
//! their environment. Nothing here is sandboxed; the policy is the only gate.

use super::{Host, ScriptResult, runtime_error};
use policy::CapabilityRequest;
use rhai::{Array, Dynamic, INT, ImmutableString, Map, Module};
use std::process::Command;
use std::sync::Arc;

pub(super) fn module(host: &Arc<Host>) -> Module {
    let mut module = Module::new();

    let h = Arc::clone(host);
    module.set_native_fn(
        "run",
        move |command: ImmutableString, args: Array| -> ScriptResult<Map> {
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            run(&h, &command, &args)
        },
    );

    let h = Arc::clone(host);
    module.set_native_fn("run", move |command: ImmutableString| -> ScriptResult<Map> {
        run(&h, &command, &[])
    });

    let h = Arc::clone(host);
    module.set_native_fn("env", move |name: ImmutableString| -> ScriptResult<Dynamic> {
        h.require(CapabilityRequest::env_read(name.as_str()))?;
        if let Some(value) = h.context.marker(&name) {
            return Ok(Dynamic::from(value.to_string()));
        }
        Ok(std::env::var(name.as_str())
            .map(Dynamic::from)
            .unwrap_or(Dynamic::UNIT))
    });

    let h = Arc::clone(host);
    module.set_native_fn("cwd", move || -> ScriptResult<ImmutableString> {
        Ok(h.context.project_root.to_string_lossy().into_owned().into())
    });

    module.set_native_fn("pid", || -> ScriptResult<INT> { Ok(std::process::id() as INT) });

    module
}

fn run(host: &Host, command: &str, args: &[String]) -> ScriptResult<Map> {
    let line = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    host.require(CapabilityRequest::exec(line.as_str()))?;

    tracing::debug!(command = %line, "process::run");
    let output = Command::new(command)
        .args(args)
        .current_dir(&host.context.project_root)
        .envs(&host.context.markers)
        .output()
        .map_err(|e| runtime_error(format!("process::run {command}: {e}")))?;

    let mut result = Map::new();
    result.insert(
        "code".into(),
        output
            .status
            .code()
            .map(|c| Dynamic::from(c as INT))
            .unwrap_or(Dynamic::UNIT),
    );
    result.insert("success".into(), Dynamic::from(output.status.success()));
    result.insert(
        "stdout".into(),
        Dynamic::from(String::from_utf8_lossy(&output.stdout).into_owned()),
    );
    result.insert(
        "stderr".into(),
        Dynamic::from(String::from_utf8_lossy(&output.stderr).into_owned()),
    );
    Ok(result)
}
