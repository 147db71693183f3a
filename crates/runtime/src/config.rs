//! Harness configuration loaded from `toolscript.toml`.

use crate::{Error, Result};
use policy::Policy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// File name looked up at the project root.
pub const CONFIG_FILE: &str = "toolscript.toml";

/// Top-level configuration. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Per-request timeout for worker calls, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Wall-clock limit for a single script, in milliseconds.
    #[serde(default)]
    pub script_timeout_ms: Option<u64>,

    /// Preferred `.mcp.json` entry.
    #[serde(default)]
    pub worker: Option<String>,

    /// Capability groups the embedder is expected to register.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Policy rules (allow/deny) for host utility modules.
    #[serde(flatten)]
    pub policy: Policy,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load `toolscript.toml` from the project root, or defaults if absent.
    pub fn discover(project_root: impl AsRef<Path>) -> Result<Self> {
        let path = project_root.as_ref().join(CONFIG_FILE);
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(mcp::DEFAULT_TIMEOUT)
    }

    pub fn script_timeout(&self) -> Option<Duration> {
        self.script_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::CapabilityRequest;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.request_timeout(), mcp::DEFAULT_TIMEOUT);
        assert_eq!(config.script_timeout(), None);
        assert!(config.worker.is_none());
        assert!(
            config
                .policy
                .check(&CapabilityRequest::exec("make"))
                .is_allowed()
        );
    }

    #[test]
    fn parses_all_keys() {
        let config = Config::parse(
            r#"
timeout_ms = 1500
script_timeout_ms = 250
worker = "tools"
capabilities = ["browser"]

[allow]
exec = ["git"]

[deny]
all = ["fs_write"]
"#,
        )
        .unwrap();

        assert_eq!(config.request_timeout(), Duration::from_millis(1500));
        assert_eq!(config.script_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.worker.as_deref(), Some("tools"));
        assert_eq!(config.capabilities, vec!["browser"]);
        assert!(
            !config
                .policy
                .check(&CapabilityRequest::exec("make"))
                .is_allowed()
        );
        assert!(
            !config
                .policy
                .check(&CapabilityRequest::fs_write("out.txt"))
                .is_allowed()
        );
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = Config::parse("timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn discover_without_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::discover(dir.path()).unwrap();
        assert!(config.capabilities.is_empty());
    }

    #[test]
    fn discover_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "worker = \"lint\"\n").unwrap();
        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.worker.as_deref(), Some("lint"));
    }
}
