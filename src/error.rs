//! Error taxonomy for the process and terminal core.
//!
//! None of these are fatal to the manager: the supervisor and reconciler
//! convert them into events at their boundary.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no free port at or above {preferred}")]
    NoPortAvailable { preferred: u16 },

    #[error("failed to spawn `{command}`: {source}")]
    ChildSpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process lookup failed: {0}")]
    ProcessLookupFailed(String),

    #[error("AI backend unavailable: {0}")]
    AiBackendUnavailable(String),

    #[error("AI query failed: {0}")]
    AiQueryFailed(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ManagerError>;
