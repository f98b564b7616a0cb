//! repro-core: record types and attribution logic for reprobuild
//!
//! This crate provides the data model of a build record:
//! - `DependencyPackage`: an external input file attributed to a package
//! - `BuildArtifact`: a file the build produced
//! - `BuildRecord`: the full manifest with deterministic YAML round-trip
//!
//! plus the supporting machinery: streaming SHA-256, the Makefile
//! canonicalizer, and the package resolver that turns raw file paths into
//! `DependencyPackage` values through the host's package database.

mod canonicalizer;
mod error;
mod hash;
mod package;
mod record;
mod resolver;

pub use canonicalizer::Canonicalizer;
pub use error::CoreError;
pub use hash::file_sha256;
pub use package::{DependencyPackage, Origin};
pub use record::{ArtifactKind, BuildArtifact, BuildRecord, RecordMetadata};
pub use resolver::from_raw_file;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
