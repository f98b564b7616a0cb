//! Error types for the observation pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can abort the pipeline.
///
/// Per-file problems never surface here; they are logged and skipped where
/// they happen. What remains is resource-level failure: the trace log or an
/// archive could not be produced.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] repro_core::CoreError),

    #[error("cannot read trace log: {0}")]
    TraceLog(PathBuf),

    #[error("archive creation failed: {0}")]
    Archive(String),
}
