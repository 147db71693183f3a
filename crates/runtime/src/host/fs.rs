//! The `fs` module.

use super::{Host, ScriptResult, runtime_error, to_json};
use policy::CapabilityRequest;
use rhai::{Array, Dynamic, ImmutableString, Module};
use std::sync::Arc;

pub(super) fn module(host: &Arc<Host>) -> Module {
    let mut module = Module::new();

    let h = Arc::clone(host);
    module.set_native_fn("read", move |path: ImmutableString| -> ScriptResult<ImmutableString> {
        h.require(CapabilityRequest::fs_read(h.scope(&path)))?;
        std::fs::read_to_string(h.context.resolve_path(path.as_str()))
            .map(Into::into)
            .map_err(|e| runtime_error(format!("fs::read {path}: {e}")))
    });

    // Non-string content is written as pretty JSON.
    let h = Arc::clone(host);
    module.set_native_fn(
        "write",
        move |path: ImmutableString, content: Dynamic| -> ScriptResult<()> {
            h.require(CapabilityRequest::fs_write(h.scope(&path)))?;
            let text = match content.clone().into_immutable_string() {
                Ok(s) => s.to_string(),
                Err(_) => serde_json::to_string_pretty(&to_json(&content)?)
                    .map_err(|e| runtime_error(format!("fs::write {path}: {e}")))?,
            };
            let full = h.context.resolve_path(path.as_str());
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| runtime_error(format!("fs::write {path}: {e}")))?;
            }
            std::fs::write(&full, text).map_err(|e| runtime_error(format!("fs::write {path}: {e}")))
        },
    );

    let h = Arc::clone(host);
    module.set_native_fn("exists", move |path: ImmutableString| -> ScriptResult<bool> {
        h.require(CapabilityRequest::fs_read(h.scope(&path)))?;
        Ok(h.context.resolve_path(path.as_str()).exists())
    });

    let h = Arc::clone(host);
    module.set_native_fn("list", move |path: ImmutableString| -> ScriptResult<Array> {
        h.require(CapabilityRequest::fs_read(h.scope(&path)))?;
        let entries = std::fs::read_dir(h.context.resolve_path(path.as_str()))
            .map_err(|e| runtime_error(format!("fs::list {path}: {e}")))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| runtime_error(format!("fs::list {path}: {e}")))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names.into_iter().map(Dynamic::from).collect())
    });

    module
}
