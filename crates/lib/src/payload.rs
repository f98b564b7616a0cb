//! Interceptor shared-object staging
//!
//! The interceptor must exist as a file on disk so the dynamic linker can
//! preload it into every build child. Packaged binaries carry it embedded
//! (see `build.rs`); development builds fall back to the cdylib cargo put
//! next to the recorder executable.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Result;

static INTERCEPTOR_PAYLOAD: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/interceptor_payload.so"));

const LIBRARY_NAME: &str = "libreprobuild_interceptor.so";

/// Write the interceptor library to `<log_dir>/reprobuild_interceptor_<pid>.so`
/// and make it world-readable and executable.
pub fn stage_interceptor(log_dir: &Path) -> Result<PathBuf> {
    let lib_path = log_dir.join(format!("reprobuild_interceptor_{}.so", std::process::id()));

    if INTERCEPTOR_PAYLOAD.is_empty() {
        let source = locate_built_library().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no embedded payload and no {LIBRARY_NAME} near the executable"),
            )
        })?;
        debug!(source = %source.display(), "staging interceptor from build tree");
        fs::copy(&source, &lib_path)?;
    } else {
        debug!(bytes = INTERCEPTOR_PAYLOAD.len(), "staging embedded interceptor");
        fs::write(&lib_path, INTERCEPTOR_PAYLOAD)?;
    }

    fs::set_permissions(&lib_path, fs::Permissions::from_mode(0o755))?;

    // The dynamic linker silently ignores a missing LD_PRELOAD entry, so
    // the file must be confirmed before it is advertised.
    if !lib_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("interceptor staging produced no file at {}", lib_path.display()),
        )
        .into());
    }

    Ok(lib_path)
}

/// Find the cargo-built cdylib near the current executable.
///
/// `target/debug/reprobuild` and `target/debug/libreprobuild_interceptor.so`
/// share a directory; test binaries live one level deeper in `deps/`.
fn locate_built_library() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;

    for candidate in [dir.join(LIBRARY_NAME), dir.parent()?.join(LIBRARY_NAME)] {
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}
