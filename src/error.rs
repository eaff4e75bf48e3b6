//! Engine-wide error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the provisioning engine and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("path {path:?} escapes {subtree:?}")]
    InvalidPath { path: String, subtree: PathBuf },

    #[error("resource already exists: {0}")]
    ResourceExists(String),

    #[error("resource missing: {0}")]
    ResourceMissing(String),

    #[error("container host unavailable: {0}")]
    HostUnavailable(String),

    #[error("quota error: {0}")]
    Quota(String),

    #[error("port allocation error: {0}")]
    PortAllocation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} is not implemented")]
    Unimplemented(&'static str),

    /// A failure during setup whose rollback also failed in part.
    ///
    /// Carries the triggering error plus every compensating action that
    /// could not be undone, labelled by step.
    #[error("{source} ({} compensating action(s) also failed)", .undo_errors.len())]
    Aggregate {
        source: Box<Error>,
        undo_errors: Vec<(String, Error)>,
    },
}

impl Error {
    /// Whether this error (or the trigger inside an aggregate) is a
    /// missing-resource condition.
    pub fn is_missing(&self) -> bool {
        match self {
            Error::ResourceMissing(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Error::Aggregate { source, .. } => source.is_missing(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
