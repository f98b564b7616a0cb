//! Host facts and environment plumbing for reprobuild
//!
//! This crate answers two questions for the rest of the recorder:
//! - what machine is this build running on (architecture, distribution,
//!   hostname, locale, umask, package manager)?
//! - how do we mutate the process environment that build children will
//!   inherit (`SOURCE_DATE_EPOCH`, flag appends, `LD_PRELOAD`)?

mod env;
mod error;
mod host;
mod pkgmgr;
mod shell;

pub use env::{append_var, export_var, prepend_var, set_source_date_epoch};
pub use error::PlatformError;
pub use host::{architecture, current_timestamp, distribution, hostname, locale, umask_string};
pub use pkgmgr::PackageManager;
pub use shell::{is_shared_lib, join_command};

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;
