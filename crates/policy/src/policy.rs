//! Policy configuration and enforcement.

use crate::{CapabilityKind, CapabilityRequest, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path};

/// Policy configuration loaded from TOML.
///
/// Omitted allow lists default to `["*"]`, so an empty policy permits every
/// host operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Capabilities that are explicitly allowed.
    #[serde(default)]
    pub allow: AllowRules,

    /// Capabilities that are explicitly denied (overrides allow).
    #[serde(default)]
    pub deny: DenyRules,
}

/// Rules for allowed capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowRules {
    /// Readable paths (`.` for anything inside the project, prefixes, `dir/*`, `dir/**`).
    #[serde(default = "any")]
    pub fs_read: Vec<String>,

    /// Writable paths, same patterns as `fs_read`.
    #[serde(default = "any")]
    pub fs_write: Vec<String>,

    /// Allowed commands (exact or prefix match).
    #[serde(default = "any")]
    pub exec: Vec<String>,

    /// Readable environment variables.
    #[serde(default = "any")]
    pub env: Vec<String>,
}

impl Default for AllowRules {
    fn default() -> Self {
        Self {
            fs_read: any(),
            fs_write: any(),
            exec: any(),
            env: any(),
        }
    }
}

fn any() -> Vec<String> {
    vec!["*".to_string()]
}

/// Rules for denied capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DenyRules {
    /// Deny all capabilities of these kinds.
    #[serde(default)]
    pub all: HashSet<CapabilityKind>,
}

/// Result of a capability check.
#[derive(Debug, Clone)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Convert a denial into an error.
    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => Err(Error::Denied(reason)),
        }
    }
}

impl Policy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Allow every host operation. This is the default.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Read inside the project only; no writes, commands, or environment.
    pub fn restrictive() -> Self {
        let mut deny_all = HashSet::new();
        deny_all.insert(CapabilityKind::Exec);
        deny_all.insert(CapabilityKind::EnvRead);

        Self {
            allow: AllowRules {
                fs_read: vec![".".to_string()],
                fs_write: Vec::new(),
                exec: Vec::new(),
                env: Vec::new(),
            },
            deny: DenyRules { all: deny_all },
        }
    }

    /// Check if a capability request is allowed.
    pub fn check(&self, request: &CapabilityRequest) -> Decision {
        if self.deny.all.contains(&request.kind) {
            return Decision::Deny {
                reason: format!("{:?} is denied by policy", request.kind),
            };
        }

        let allowed = match request.kind {
            CapabilityKind::FsRead => check_path_allowed(&self.allow.fs_read, &request.scope),
            CapabilityKind::FsWrite => check_path_allowed(&self.allow.fs_write, &request.scope),
            CapabilityKind::Exec => check_command_allowed(&self.allow.exec, &request.scope),
            CapabilityKind::EnvRead => check_exact_allowed(&self.allow.env, &request.scope),
        };

        if allowed {
            Decision::Allow
        } else {
            Decision::Deny {
                reason: format!(
                    "{:?} not in allowlist{}",
                    request.kind,
                    request
                        .scope
                        .as_ref()
                        .map(|s| format!(" (scope: {s})"))
                        .unwrap_or_default()
                ),
            }
        }
    }
}

fn check_path_allowed(allowlist: &[String], scope: &Option<String>) -> bool {
    let Some(path) = scope else {
        return !allowlist.is_empty(); // No scope = any path, allow if list non-empty
    };
    let path = path.strip_prefix("./").unwrap_or(path);

    for pattern in allowlist {
        if pattern == "*" || pattern == "**" {
            return true;
        }
        // "." = anything that stays inside the project root
        if pattern == "." || pattern == "./" {
            if is_contained(path) {
                return true;
            }
            continue;
        }

        let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
        // Recursive glob: foo/** matches foo/bar/baz
        if let Some(prefix) = pattern.strip_suffix("/**") {
            if path.starts_with(prefix) && is_contained(path) {
                return true;
            }
            continue;
        }
        // Simple glob: foo/* matches foo/bar but not foo/bar/baz
        if let Some(prefix) = pattern.strip_suffix("/*") {
            if let Some(rest) = path.strip_prefix(prefix) {
                let rest = rest.trim_start_matches('/');
                if !rest.is_empty() && !rest.contains('/') {
                    return true;
                }
            }
            continue;
        }
        if path.starts_with(pattern) && is_contained(path) {
            return true;
        }
    }
    false
}

/// Relative and free of `..`.
fn is_contained(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn check_command_allowed(allowlist: &[String], scope: &Option<String>) -> bool {
    let Some(cmd) = scope else {
        return !allowlist.is_empty();
    };

    allowlist.iter().any(|allowed| {
        // Exact match or prefix match (e.g., "git" allows "git status")
        allowed == "*" || cmd == allowed || cmd.starts_with(&format!("{allowed} "))
    })
}

fn check_exact_allowed(allowlist: &[String], scope: &Option<String>) -> bool {
    let Some(key) = scope else {
        return !allowlist.is_empty();
    };

    allowlist.iter().any(|a| a == "*" || a == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_everything() {
        let policy = Policy::default();
        assert!(policy.check(&CapabilityRequest::exec("rm -rf build")).is_allowed());
        assert!(policy.check(&CapabilityRequest::fs_write("/etc/hosts")).is_allowed());
        assert!(policy.check(&CapabilityRequest::env_read("HOME")).is_allowed());
    }

    #[test]
    fn restrictive_denies_exec() {
        let policy = Policy::restrictive();
        let req = CapabilityRequest::exec("git status");
        assert!(!policy.check(&req).is_allowed());
    }

    #[test]
    fn restrictive_reads_inside_project_only() {
        let policy = Policy::restrictive();
        assert!(policy.check(&CapabilityRequest::fs_read("./src/main.rs")).is_allowed());
        assert!(policy.check(&CapabilityRequest::fs_read("src/main.rs")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::fs_read("../secrets")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::fs_read("/etc/passwd")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::fs_write("out.txt")).is_allowed());
    }

    #[test]
    fn globs() {
        let policy = Policy::parse(
            r#"
[allow]
fs_write = ["out/*", "build/**"]
"#,
        )
        .unwrap();
        assert!(policy.check(&CapabilityRequest::fs_write("out/a.txt")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::fs_write("out/a/b.txt")).is_allowed());
        assert!(policy.check(&CapabilityRequest::fs_write("build/a/b.txt")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::fs_write("src/lib.rs")).is_allowed());
    }

    #[test]
    fn parse_toml() {
        let toml = r#"
[allow]
fs_read = ["./", "docs/**"]
exec = ["git"]
env = ["HOME"]

[deny]
all = ["fs_write"]
"#;
        let policy = Policy::parse(toml).unwrap();

        // Allowed
        assert!(policy.check(&CapabilityRequest::fs_read("./foo.txt")).is_allowed());
        assert!(policy.check(&CapabilityRequest::exec("git status")).is_allowed());
        assert!(policy.check(&CapabilityRequest::env_read("HOME")).is_allowed());

        // Denied
        assert!(!policy.check(&CapabilityRequest::exec("gitk")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::env_read("AWS_SECRET")).is_allowed());
        let denied = policy.check(&CapabilityRequest::fs_write("foo.txt"));
        assert!(matches!(denied.into_result(), Err(Error::Denied(_))));
    }
}
