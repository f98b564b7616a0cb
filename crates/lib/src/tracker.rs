//! Pipeline coordinator
//!
//! Drives the traced build and folds everything the trace revealed into
//! the record. The only parallel section is package resolution: every
//! input file is independent and each resolution spends most of its time
//! waiting on `dpkg`/`rpm`, so the fan-out is bounded and the results are
//! folded back on the coordinator as they complete.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use repro_core::{DependencyPackage, from_raw_file};
use repro_platform::PackageManager;

use crate::info::BuildInfo;
use crate::trace::{self, TraceParser};
use crate::Result;

/// Upper bound on concurrent resolver tasks. Each task spawns short-lived
/// subprocesses, so more parallelism than this just thrashes the fork path.
const MAX_RESOLVER_WORKERS: usize = 8;

/// Run the build under observation and populate `info.record` with the
/// resolved dependencies and detected artifacts.
///
/// The record is not persisted here; the caller saves it after the
/// postprocessor has folded in the interceptor's commit log.
pub async fn track_build(info: &mut BuildInfo) -> Result<()> {
    info!(command = %info.build_command, "build command");

    let total_start = Instant::now();

    let build_start = Instant::now();
    let trace_output = trace::execute_with_strace(info).await?;
    let build_elapsed = build_start.elapsed();

    let parser = TraceParser::new(info.build_path.clone());
    let libraries = parser.parse_lib_files(&trace_output);
    let headers = parser.parse_header_files(&trace_output);
    let executables = parser.parse_executables(&trace_output);

    info!(count = libraries.len(), "found libraries");
    info!(count = headers.len(), "found header files");
    info!(count = executables.len(), "found executables");

    let inputs: BTreeSet<String> = libraries
        .into_iter()
        .chain(headers)
        .chain(executables)
        .collect();

    resolve_dependencies(info, inputs).await;

    // Artifact detection stats and hashes a handful of files; not worth a
    // pool.
    for artifact in parser.detect_build_artifacts(&trace_output) {
        info.record.add_artifact(artifact);
    }

    info!(
        total_secs = total_start.elapsed().as_secs_f64(),
        build_secs = build_elapsed.as_secs_f64(),
        dependencies = info.record.dependencies.len(),
        artifacts = info.record.artifacts.len(),
        "build tracking finished"
    );

    Ok(())
}

/// Resolve every input file against the package database, a bounded number
/// at a time, and insert the valid results into the record.
async fn resolve_dependencies(info: &mut BuildInfo, inputs: BTreeSet<String>) {
    let permits = worker_count();
    debug!(inputs = inputs.len(), workers = permits, "resolving dependencies");

    let semaphore = Arc::new(Semaphore::new(permits));
    let mut join_set: JoinSet<(String, DependencyPackage)> = JoinSet::new();

    for path in inputs {
        let semaphore = semaphore.clone();
        let pkg_mgr: PackageManager = info.package_manager;

        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.unwrap();
            let package = from_raw_file(Path::new(&path), pkg_mgr).await;
            (path, package)
        });
    }

    // Single consumer: insertion into the record is serialized here.
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((path, package)) => {
                if package.is_valid() {
                    debug!(
                        name = %package.name,
                        version = %package.version,
                        "added dependency"
                    );
                    info.record.add_dependency(package);
                } else {
                    debug!(path = %path, reason = %package.hash, "skipped unresolved file");
                }
            }
            Err(e) => {
                // A panicked resolver loses one file, never the record.
                error!(error = %e, "resolver task failed");
            }
        }
    }
}

fn worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.min(MAX_RESOLVER_WORKERS).max(1)
}
