//! Pipeline-level error taxonomy.
//!
//! Per-edit failures (bad path syntax, unresolved navigation, shape
//! mismatches) are logged and skipped by the merge executor; only the
//! errors here abort a whole pipeline. Each variant maps to a distinct
//! process exit code for embedders that surface them.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bad invocation: {0}")]
    BadInvocation(String),

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive failure on {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("JSON decode failure on {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("diff document decode failure: {0}")]
    DiffDocument(#[source] serde_json::Error),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn decode(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        EngineError::Decode {
            path: path.into(),
            source,
        }
    }

    pub fn archive(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        EngineError::Archive {
            path: path.into(),
            source,
        }
    }

    /// Distinct non-zero exit code per failure kind; success is 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::BadInvocation(_) => 2,
            EngineError::Io { .. } => 3,
            EngineError::Archive { .. } => 4,
            EngineError::Decode { .. } => 5,
            EngineError::DiffDocument(_) => 6,
        }
    }
}
