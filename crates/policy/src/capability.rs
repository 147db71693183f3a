use serde::{Deserialize, Serialize};

/// Host operations a script can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    FsRead,
    FsWrite,
    Exec,
    EnvRead,
}

/// A capability request with optional scope.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub kind: CapabilityKind,
    pub scope: Option<String>, // path, command line, or variable name
}

impl CapabilityRequest {
    pub fn new(kind: CapabilityKind) -> Self {
        Self { kind, scope: None }
    }

    pub fn with_scope(kind: CapabilityKind, scope: impl Into<String>) -> Self {
        Self {
            kind,
            scope: Some(scope.into()),
        }
    }

    pub fn fs_read(path: impl Into<String>) -> Self {
        Self::with_scope(CapabilityKind::FsRead, path)
    }

    pub fn fs_write(path: impl Into<String>) -> Self {
        Self::with_scope(CapabilityKind::FsWrite, path)
    }

    pub fn exec(command: impl Into<String>) -> Self {
        Self::with_scope(CapabilityKind::Exec, command)
    }

    pub fn env_read(name: impl Into<String>) -> Self {
        Self::with_scope(CapabilityKind::EnvRead, name)
    }
}
