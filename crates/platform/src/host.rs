//! Host fact collection
//!
//! Everything here degrades to `"Unknown"` rather than failing: a record
//! with a hole in its metadata is still worth writing.

use std::fs;
use std::process::Command;

use chrono::Local;
use tracing::debug;

/// Timestamp format used throughout the recorder (ISO-8601, seconds
/// precision, local time). `set_source_date_epoch` parses this same form
/// back, so the two must not drift apart.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const UNKNOWN: &str = "Unknown";

/// CPU architecture of the running recorder (e.g. "x86_64")
pub fn architecture() -> String {
    std::env::consts::ARCH.to_string()
}

/// Human-readable distribution name
///
/// Reads `PRETTY_NAME` from `/etc/os-release` (quotes stripped), falls back
/// to `lsb_release -d -s`, else `"Unknown"`.
pub fn distribution() -> String {
    if let Ok(content) = fs::read_to_string("/etc/os-release") {
        for line in content.lines() {
            if let Some(value) = line.strip_prefix("PRETTY_NAME=") {
                let name = value.trim().trim_matches('"');
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
    }

    if let Ok(output) = Command::new("lsb_release").args(["-d", "-s"]).output() {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    debug!("distribution could not be determined");
    UNKNOWN.to_string()
}

/// Hostname of the build machine
pub fn hostname() -> String {
    whoami::fallible::hostname().unwrap_or_else(|_| UNKNOWN.to_string())
}

/// Active locale, from `LC_ALL` then `LANG`
pub fn locale() -> String {
    std::env::var("LC_ALL")
        .or_else(|_| std::env::var("LANG"))
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Current process umask formatted as four octal digits (e.g. "0022")
///
/// The mask can only be read by setting it, so it is set to zero and
/// immediately restored.
pub fn umask_string() -> String {
    use nix::sys::stat::{Mode, umask};

    let current = umask(Mode::empty());
    umask(current);
    format!("{:04o}", current.bits())
}

/// Current local time, ISO-8601 seconds precision; `"Unknown"` never
/// happens in practice but callers may rely on the function not failing.
pub fn current_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}
