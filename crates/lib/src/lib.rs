//! reprobuild-lib: the build-observation pipeline
//!
//! Data flows in one direction through this crate:
//!
//! ```text
//! BuildInfo ─▶ preprocess (env, interceptor, Makefile)
//!           ─▶ trace     (strace acquisition + extraction)
//!           ─▶ tracker   (resolver fan-out, artifact hashing)
//!           ─▶ postprocess (commit-log folding)
//! ```
//!
//! The caller owns the `BuildInfo`; every stage borrows it for the duration
//! of its call and nothing holds a reference across stages.

mod error;
mod payload;

pub mod bundle;
pub mod info;
pub mod postprocess;
pub mod preprocess;
pub mod trace;
pub mod tracker;

pub use error::TrackError;
pub use info::BuildInfo;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, TrackError>;
