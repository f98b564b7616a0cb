//! Process-environment mutation
//!
//! All of these mutate the recorder's own environment so that the traced
//! build and every child it spawns inherit the values. They must only be
//! called from the coordinator thread, before the build subprocess (and the
//! async runtime) exists; that is what makes the `unsafe` env calls sound.

use chrono::{Local, NaiveDateTime, TimeZone};
use tracing::{debug, warn};

use crate::host::TIMESTAMP_FORMAT;

/// Set the environment variable `name` to `value`, replacing any previous
/// value.
pub fn export_var(name: &str, value: &str) {
    debug!(var = name, value, "environment export");
    unsafe { std::env::set_var(name, value) };
}

/// Append `value` to the environment variable `name`, space-separated.
///
/// Creates the variable when absent. Not idempotent: appending the same
/// value twice yields it twice.
pub fn append_var(name: &str, value: &str) {
    let merged = match std::env::var(name) {
        Ok(existing) if !existing.is_empty() => format!("{existing} {value}"),
        _ => value.to_string(),
    };
    debug!(var = name, value = %merged, "environment append");
    // Single-threaded at this point in the pipeline; see module docs.
    unsafe { std::env::set_var(name, merged) };
}

/// Prepend `value` to the environment variable `name`, space-separated.
///
/// Used for `LD_PRELOAD`, where the interceptor must come first.
pub fn prepend_var(name: &str, value: &str) {
    let merged = match std::env::var(name) {
        Ok(existing) if !existing.is_empty() => format!("{value} {existing}"),
        _ => value.to_string(),
    };
    debug!(var = name, value = %merged, "environment prepend");
    unsafe { std::env::set_var(name, merged) };
}

/// Parse a recorder timestamp and export it as `SOURCE_DATE_EPOCH`.
///
/// The timestamp must be in the same local ISO-8601 form that
/// `current_timestamp` produces. A malformed timestamp logs a warning and
/// leaves the environment untouched.
pub fn set_source_date_epoch(timestamp: &str) {
    let Ok(naive) = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT) else {
        warn!(timestamp, "could not parse timestamp for SOURCE_DATE_EPOCH");
        return;
    };

    let Some(local) = Local.from_local_datetime(&naive).single() else {
        warn!(timestamp, "timestamp is ambiguous in the local timezone");
        return;
    };

    let epoch = local.timestamp().to_string();
    debug!(epoch = %epoch, "setting SOURCE_DATE_EPOCH");
    unsafe { std::env::set_var("SOURCE_DATE_EPOCH", epoch) };
}
