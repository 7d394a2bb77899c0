//! Engine error types.

use std::path::PathBuf;

use thiserror::Error;

/// Engine result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading programs or producing snapshots.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read program directory {path}: {source}")]
    ProgramDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No programs found in {0}")]
    NoPrograms(PathBuf),

    #[error("Program {program}: {message}")]
    Program { program: String, message: String },

    #[error("Program {program}: invalid pattern for {metric}: {source}")]
    Pattern {
        program: String,
        metric: String,
        #[source]
        source: regex::Error,
    },

    #[error("Metric {name} redeclared with a different kind or label keys")]
    Conflict { name: String },

    #[error("No log paths to tail")]
    NoLogs,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn program(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Program {
            program: program.into(),
            message: message.into(),
        }
    }
}
