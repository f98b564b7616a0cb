//! Error types for repro-platform

use thiserror::Error;

/// Errors that can occur while reading host facts
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timestamp '{0}' is not in the expected ISO-8601 form")]
    Timestamp(String),
}
