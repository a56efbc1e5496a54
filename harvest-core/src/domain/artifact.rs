//! Artifact domain types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Well-known artifact tags
pub mod tags {
    /// Result slot populated by the worker
    pub const RETVAL: &str = "retval";
    /// The caller's executable unit of work
    pub const CLIENTSCRIPT: &str = "clientscript";
    /// Serialized call arguments
    pub const ARGS: &str = "args";
    /// Snapshot of the caller's working directory
    pub const WORKSPACE: &str = "workspace";

    /// Tags owned by the completion service; caller files may not use them
    pub const RESERVED: [&str; 4] = [RETVAL, CLIENTSCRIPT, ARGS, WORKSPACE];

    /// Returns true when `tag` is one of the reserved tags
    pub fn is_reserved(tag: &str) -> bool {
        RESERVED.contains(&tag)
    }
}

/// A tagged file or blob attached to an experiment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Mutable artifacts are written by workers after submission
    pub mutable: bool,

    /// Caller-side source path, captured into the store on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<PathBuf>,

    /// Location assigned by the artifact store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Artifact {
    /// An immutable input read from `path`
    pub fn immutable(path: impl Into<PathBuf>) -> Self {
        Self {
            mutable: false,
            local: Some(path.into()),
            key: None,
        }
    }

    /// A mutable output slot filled in by the worker
    pub fn output() -> Self {
        Self {
            mutable: true,
            local: None,
            key: None,
        }
    }
}
