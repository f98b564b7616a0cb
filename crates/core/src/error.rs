//! Error types for repro-core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during record and attribution operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("cannot open record file: {0}")]
    RecordNotFound(PathBuf),

    #[error("subprocess '{command}' failed: {detail}")]
    Subprocess { command: String, detail: String },
}
