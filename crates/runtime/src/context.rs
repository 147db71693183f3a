//! Per-execution context.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Set to `1` for processes launched from a script.
pub const EXECUTION_MARKER: &str = "TOOLSCRIPT_EXECUTION";

/// Set to `1` so git hooks and similar automation can skip themselves.
pub const SKIP_HOOKS_MARKER: &str = "TOOLSCRIPT_SKIP_HOOKS";

/// Disables husky-managed git hooks.
pub const HUSKY_MARKER: &str = "HUSKY";

/// Identity and environment markers of one script execution.
///
/// Markers are applied to child processes started by `process::run` and
/// visible to scripts as `context.markers`; the host process environment is
/// never modified.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub project_root: PathBuf,
    pub markers: BTreeMap<String, String>,
}

impl ExecutionContext {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let markers = [
            (EXECUTION_MARKER, "1"),
            (SKIP_HOOKS_MARKER, "1"),
            (HUSKY_MARKER, "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            execution_id: Uuid::new_v4(),
            started_at: Utc::now(),
            project_root: project_root.into(),
            markers,
        }
    }

    /// Add or replace a marker.
    pub fn with_marker(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.markers.insert(key.into(), value.into());
        self
    }

    pub fn marker(&self, key: &str) -> Option<&str> {
        self.markers.get(key).map(String::as_str)
    }

    /// Resolve a script-supplied path against the project root.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_markers() {
        let ctx = ExecutionContext::new("/work");
        assert_eq!(ctx.marker(EXECUTION_MARKER), Some("1"));
        assert_eq!(ctx.marker(SKIP_HOOKS_MARKER), Some("1"));
        assert_eq!(ctx.marker(HUSKY_MARKER), Some("0"));
        assert_eq!(std::env::var(EXECUTION_MARKER).ok(), None);
    }

    #[test]
    fn ids_are_unique() {
        let a = ExecutionContext::new(".");
        let b = ExecutionContext::new(".");
        assert_ne!(a.execution_id, b.execution_id);
    }

    #[test]
    fn resolves_relative_paths() {
        let ctx = ExecutionContext::new("/work").with_marker("CI", "1");
        assert_eq!(ctx.resolve_path("src/lib.rs"), PathBuf::from("/work/src/lib.rs"));
        assert_eq!(ctx.resolve_path("/tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(ctx.marker("CI"), Some("1"));
    }

    #[test]
    fn serializes_camel_case() {
        let ctx = ExecutionContext::new("/work");
        let value = serde_json::to_value(&ctx).unwrap();
        assert!(value.get("executionId").is_some());
        assert!(value.get("startedAt").is_some());
        assert_eq!(value["projectRoot"], "/work");
        assert_eq!(value["markers"][HUSKY_MARKER], "0");
    }
}
