//! Worker launch descriptor, read from `.mcp.json` at the project root.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Launch config location, relative to the project root.
pub const CONFIG_FILE: &str = ".mcp.json";

/// How to launch one worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchFile {
    #[serde(default)]
    mcp_servers: BTreeMap<String, WorkerConfig>,
}

impl WorkerConfig {
    /// Load the launch entry for `project_root`.
    ///
    /// With `preferred` set, that entry must exist; otherwise the first entry
    /// by name with a non-empty command is used.
    pub fn load(project_root: &Path, preferred: Option<&str>) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::ProcessUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&content, preferred)
    }

    /// Parse a launch file and select an entry.
    pub fn parse(content: &str, preferred: Option<&str>) -> Result<Self> {
        let file: LaunchFile = serde_json::from_str(content)
            .map_err(|e| Error::ProcessUnavailable(format!("invalid {CONFIG_FILE}: {e}")))?;

        let selected = match preferred {
            Some(name) => file
                .mcp_servers
                .into_iter()
                .find(|(key, config)| key == name && !config.command.is_empty()),
            None => file
                .mcp_servers
                .into_iter()
                .find(|(_, config)| !config.command.is_empty()),
        };

        let (name, mut config) = selected.ok_or_else(|| {
            Error::ProcessUnavailable(match preferred {
                Some(name) => format!("no launchable worker named {name} in {CONFIG_FILE}"),
                None => format!("no launchable worker entry in {CONFIG_FILE}"),
            })
        })?;
        config.name = name;
        Ok(config)
    }
}
