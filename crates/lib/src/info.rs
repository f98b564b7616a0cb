//! Per-invocation build state
//!
//! `BuildInfo` is created once after argument parsing and owns the
//! `BuildRecord` for its whole life. The pipeline stages borrow it; none of
//! them stores a handle to it.

use std::path::{Path, PathBuf};

use repro_core::BuildRecord;
use repro_platform::{self as platform, PackageManager};

/// Everything the pipeline needs to know about the current invocation.
#[derive(Debug)]
pub struct BuildInfo {
    /// The build command as a single shell-safe string.
    pub build_command: String,
    pub output_file: PathBuf,
    pub log_dir: PathBuf,

    /// Captured once at construction; never mutated afterwards.
    pub build_timestamp: String,
    /// Absolute, canonical path of the directory the build runs in.
    pub build_path: PathBuf,
    pub random_seed: String,

    /// Filled in by the preprocessor once the interceptor is staged.
    pub interceptor_lib_path: Option<PathBuf>,
    /// Where the interceptor appends observed clone commits.
    pub commit_log_path: PathBuf,

    pub package_manager: PackageManager,

    pub record: BuildRecord,
}

impl BuildInfo {
    pub fn new(build_command: String, output_file: PathBuf, log_dir: PathBuf) -> Self {
        let build_path = std::env::current_dir()
            .and_then(std::fs::canonicalize)
            .unwrap_or_else(|_| PathBuf::from("."));
        let commit_log_path = log_dir.join("git_clone_commits.log");
        let package_manager = PackageManager::detect(&platform::distribution());

        Self {
            build_command,
            output_file,
            log_dir,
            build_timestamp: platform::current_timestamp(),
            build_path,
            random_seed: "0".to_string(),
            interceptor_lib_path: None,
            commit_log_path,
            package_manager,
            record: BuildRecord::default(),
        }
    }

    /// Project name: the basename of the build directory.
    pub fn project_name(&self) -> String {
        self.build_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default_project".to_string())
    }

    /// Copy host facts and invocation data into the owned record.
    pub fn fill_record_metadata(&mut self) {
        self.record.project = self.project_name();

        let metadata = &mut self.record.metadata;
        metadata.architecture = platform::architecture();
        metadata.distribution = platform::distribution();
        metadata.build_cmd = self.build_command.clone();
        metadata.build_path = self.build_path.to_string_lossy().into_owned();
        metadata.build_timestamp = self.build_timestamp.clone();
        metadata.hostname = platform::hostname();
        metadata.locale = platform::locale();
        metadata.umask = platform::umask_string();
        metadata.random_seed = self.random_seed.clone();
    }

    /// Path of the strace log for this invocation.
    pub fn trace_log_path(&self) -> PathBuf {
        self.log_dir.join(format!("strace_{}.log", std::process::id()))
    }

    /// Whether `path` lies inside the build directory.
    pub fn is_under_build_path(&self, path: &Path) -> bool {
        path.starts_with(&self.build_path)
    }
}
