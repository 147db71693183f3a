//! The `tools` module: one function per facade entry.

use super::{ScriptResult, from_json, runtime_error, to_json};
use mcp::{ToolEntry, ToolFacade};
use rhai::{Array, Dynamic, ImmutableString, Map, Module};
use serde_json::Value;
use tokio::runtime::Handle;

/// Script identifier for a tool name: anything not alphanumeric becomes `_`.
pub fn script_name(tool: &str) -> String {
    let mut name: String = tool
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

pub(crate) fn tools_module(facade: &ToolFacade, handle: &Handle) -> Module {
    let mut module = Module::new();

    for entry in facade.entries() {
        let name = script_name(&entry.descriptor.name);

        let (tool, rt) = (entry.clone(), handle.clone());
        module.set_native_fn(name.as_str(), move |args: Dynamic| -> ScriptResult<Dynamic> {
            invoke(&rt, &tool, args)
        });

        let (tool, rt) = (entry.clone(), handle.clone());
        module.set_native_fn(name.as_str(), move || -> ScriptResult<Dynamic> {
            invoke(&rt, &tool, Dynamic::UNIT)
        });
    }

    let (tools, rt) = (facade.clone(), handle.clone());
    module.set_native_fn(
        "call",
        move |name: ImmutableString, args: Dynamic| -> ScriptResult<Dynamic> {
            invoke(&rt, lookup(&tools, &name)?, args)
        },
    );

    let (tools, rt) = (facade.clone(), handle.clone());
    module.set_native_fn("call", move |name: ImmutableString| -> ScriptResult<Dynamic> {
        invoke(&rt, lookup(&tools, &name)?, Dynamic::UNIT)
    });

    let names: Array = facade.names().map(|n| Dynamic::from(n.to_string())).collect();
    module.set_native_fn("list", move || -> ScriptResult<Array> { Ok(names.clone()) });

    let tools = facade.clone();
    module.set_native_fn("describe", move |name: ImmutableString| -> ScriptResult<Map> {
        let entry = lookup(&tools, &name)?;
        let mut map = Map::new();
        map.insert("name".into(), Dynamic::from(entry.descriptor.name.clone()));
        map.insert(
            "description".into(),
            entry
                .descriptor
                .description
                .clone()
                .map(Dynamic::from)
                .unwrap_or(Dynamic::UNIT),
        );
        map.insert(
            "inputSchema".into(),
            from_json(entry.descriptor.input_schema.clone())?,
        );
        Ok(map)
    });

    module
}

fn lookup<'a>(facade: &'a ToolFacade, name: &str) -> ScriptResult<&'a ToolEntry> {
    facade
        .get(name)
        .ok_or_else(|| runtime_error(mcp::Error::ToolNotFound(name.to_string()).to_string()))
}

/// Call a tool from the script thread, blocking on the async channel.
fn invoke(handle: &Handle, entry: &ToolEntry, args: Dynamic) -> ScriptResult<Dynamic> {
    let args = if args.is_unit() {
        Value::Object(Default::default())
    } else {
        to_json(&args)?
    };
    tracing::debug!(tool = %entry.descriptor.name, "tool call from script");
    let result = handle
        .block_on((entry.invoker)(args))
        .map_err(|e| runtime_error(format!("{}: {e}", entry.descriptor.name)))?;
    from_json(result)
}
