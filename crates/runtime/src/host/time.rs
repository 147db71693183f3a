//! The `time` module.

use super::{Host, ScriptResult};
use chrono::{SecondsFormat, Utc};
use rhai::{INT, ImmutableString, Module};
use std::sync::Arc;
use std::time::Duration;

pub(super) fn module(host: &Arc<Host>) -> Module {
    let mut module = Module::new();

    module.set_native_fn("now", || -> ScriptResult<ImmutableString> {
        Ok(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true).into())
    });

    module.set_native_fn("timestamp_ms", || -> ScriptResult<INT> {
        Ok(Utc::now().timestamp_millis())
    });

    let h = Arc::clone(host);
    module.set_native_fn("elapsed_ms", move || -> ScriptResult<INT> {
        Ok(h.started.elapsed().as_millis() as INT)
    });

    module.set_native_fn("sleep", |ms: INT| -> ScriptResult<()> {
        std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
        Ok(())
    });

    module
}
