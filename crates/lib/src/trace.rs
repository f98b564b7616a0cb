//! Trace acquisition and extraction
//!
//! The build runs under `strace` with a narrow syscall filter; the
//! resulting log is mined for four sets: libraries and headers the build
//! read, programs it executed, and files it created. Each extractor walks
//! the trace line by line; lines that fit no pattern are skipped silently.

use std::collections::{BTreeSet, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use repro_core::{ArtifactKind, BuildArtifact, file_sha256};
use repro_platform::is_shared_lib;

use crate::info::BuildInfo;
use crate::{Result, TrackError};

/// Path substrings that never contribute to any set.
const DEFAULT_IGNORE_PATTERNS: &[&str] = &["/tmp/", "/proc/", "/sys/", "/dev/"];

/// Shell and coreutils helpers that appear in virtually every build and
/// carry no dependency information.
const IGNORED_EXECUTABLES: &[&str] = &[
    "/bin/sh",
    "/bin/bash",
    "/bin/dash",
    "/bin/zsh",
    "/usr/bin/env",
    "/usr/bin/which",
    "/usr/bin/dirname",
    "/usr/bin/basename",
    "/bin/echo",
    "/bin/cat",
    "/bin/grep",
    "/bin/sed",
    "/bin/awk",
    "/bin/ls",
    "/bin/cp",
    "/bin/mv",
    "/bin/rm",
    "/bin/mkdir",
    "/usr/bin/test",
    "/usr/bin/[",
    "/bin/true",
    "/bin/false",
];

/// Header extensions accepted by the header extractor. The extension must
/// be the final one: `foo.h.gch` is a precompiled header, not a header.
const HEADER_EXTENSIONS: &[&str] = &["h", "hpp", "hxx", "hh", "H"];

/// Run the build command under strace and return the trace text.
///
/// The build's own stdout/stderr pass through untouched. A non-zero build
/// exit is reported but not fatal; an unreadable trace log is.
pub async fn execute_with_strace(info: &BuildInfo) -> Result<String> {
    let trace_log = info.trace_log_path();
    let strace_cmd = format!(
        "strace -e trace=openat,execve,execveat,creat -y -f -q -o {} {}",
        trace_log.display(),
        info.build_command
    );

    debug!(command = %strace_cmd, "executing traced build");

    match Command::new("sh").arg("-c").arg(&strace_cmd).status().await {
        Ok(status) if !status.success() => {
            warn!(code = ?status.code(), "build command exited non-zero");
        }
        Err(e) => {
            warn!(error = %e, "failed to launch traced build");
        }
        _ => {}
    }

    tokio::fs::read_to_string(&trace_log)
        .await
        .map_err(|_| TrackError::TraceLog(trace_log))
}

/// Line-oriented extractor over a captured trace.
pub struct TraceParser {
    build_path: PathBuf,
    ignore_patterns: Vec<String>,

    openat_path: Regex,
    lib_path: Regex,
    exec_path: Regex,
    create_resolved: Regex,
    create_absolute: Regex,
    creat_call: Regex,
}

impl TraceParser {
    pub fn new(build_path: PathBuf) -> Self {
        Self {
            build_path,
            ignore_patterns: DEFAULT_IGNORE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),

            openat_path: Regex::new(r#"openat\([^,]+,\s*"([^"]+)""#).expect("static regex"),
            lib_path: Regex::new(r#"openat\([^,]+,\s*"([^"]*\.(?:so|a)[^"]*)""#)
                .expect("static regex"),
            exec_path: Regex::new(r#"\d+\s+(?:execve|execveat)\("([^"]+)""#)
                .expect("static regex"),
            // strace -y resolves dirfds: openat(AT_FDCWD</some/dir>, "name", ... O_CREAT
            create_resolved: Regex::new(r#"\d+\s+(?:openat|creat)\([^,]*<([^>]+)>,\s*"([^"]+)"[^)]*O_CREAT"#)
                .expect("static regex"),
            create_absolute: Regex::new(r#"\d+\s+openat\([^,]*,\s*"(/[^"]+)"[^)]*O_CREAT"#)
                .expect("static regex"),
            creat_call: Regex::new(r#"\d+\s+creat\("([^"]+)""#).expect("static regex"),
        }
    }

    pub fn add_ignore_pattern(&mut self, pattern: impl Into<String>) {
        self.ignore_patterns.push(pattern.into());
    }

    /// Shared and static libraries opened by the build.
    pub fn parse_lib_files(&self, trace: &str) -> BTreeSet<String> {
        let mut libraries = BTreeSet::new();

        for line in trace.lines() {
            let Some(caps) = self.lib_path.captures(line) else {
                continue;
            };
            let path = &caps[1];

            if !Path::new(path).exists() || self.should_ignore_lib(path) {
                continue;
            }

            let is_static = path.ends_with(".a");
            if !is_static && !is_shared_lib(path) {
                continue;
            }

            let kind = if is_static { "static" } else { "shared" };
            debug!(path, kind, "found library");
            libraries.insert(path.to_string());
        }

        libraries
    }

    /// Header files opened by the build.
    pub fn parse_header_files(&self, trace: &str) -> BTreeSet<String> {
        let mut headers = BTreeSet::new();

        for line in trace.lines() {
            let Some(caps) = self.openat_path.captures(line) else {
                continue;
            };
            let path = &caps[1];

            if !is_header_path(path) {
                continue;
            }
            if !Path::new(path).exists() || self.should_ignore_header(path) {
                continue;
            }

            debug!(path, "found header file");
            headers.insert(path.to_string());
        }

        headers
    }

    /// Programs executed during the build.
    pub fn parse_executables(&self, trace: &str) -> BTreeSet<String> {
        let mut executables = BTreeSet::new();

        for line in trace.lines() {
            let Some(caps) = self.exec_path.captures(line) else {
                continue;
            };
            let path = &caps[1];

            if !Path::new(path).exists() || self.should_ignore_executable(path) {
                continue;
            }

            debug!(path, "found executable");
            executables.insert(path.to_string());
        }

        executables
    }

    /// Files the build created, classified and hashed.
    ///
    /// Order is first-seen order in the trace; duplicates collapse onto
    /// their first occurrence.
    pub fn detect_build_artifacts(&self, trace: &str) -> Vec<BuildArtifact> {
        let mut seen = HashSet::new();
        let mut created = Vec::new();

        for line in trace.lines() {
            let Some(path) = self.created_path(line) else {
                continue;
            };
            if Path::new(&path).exists() && seen.insert(path.clone()) {
                debug!(path = %path, "found created file");
                created.push(path);
            }
        }

        let mut artifacts = Vec::new();
        for path in created {
            if self.should_ignore_artifact(&path) {
                continue;
            }

            let kind = if is_shared_lib(&path) {
                ArtifactKind::SharedLibrary
            } else if owner_executable(Path::new(&path)) {
                ArtifactKind::Executable
            } else {
                continue;
            };

            let hash = match file_sha256(Path::new(&path)) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(path = %path, error = %e, "could not hash artifact");
                    continue;
                }
            };

            let display_str = self.display_path(&path);
            debug!(path = %display_str, kind = ?kind, "added artifact");
            artifacts.push(BuildArtifact::new(display_str, hash, kind));
        }

        artifacts
    }

    /// The created-file path named by a trace line, if any.
    ///
    /// The three creation shapes are tried in a fixed order; the first one
    /// that fits wins.
    fn created_path(&self, line: &str) -> Option<String> {
        if let Some(caps) = self.create_resolved.captures(line) {
            return Some(format!("{}/{}", &caps[1], &caps[2]));
        }
        if let Some(caps) = self.create_absolute.captures(line) {
            return Some(caps[1].to_string());
        }
        if let Some(caps) = self.creat_call.captures(line) {
            return Some(caps[1].to_string());
        }
        None
    }

    /// Artifact path as recorded: relative to the build path when inside
    /// it, absolute otherwise. Symlinks are resolved on both sides before
    /// comparing, so a relative result can never escape upward.
    fn display_path(&self, path: &str) -> String {
        let absolute = match std::fs::canonicalize(path) {
            Ok(p) => p,
            Err(_) => return path.to_string(),
        };
        let base = match std::fs::canonicalize(&self.build_path) {
            Ok(p) => p,
            Err(_) => return absolute.to_string_lossy().into_owned(),
        };

        match absolute.strip_prefix(&base) {
            Ok(relative) => relative.to_string_lossy().into_owned(),
            Err(_) => absolute.to_string_lossy().into_owned(),
        }
    }

    fn should_ignore_file(&self, path: &str) -> bool {
        self.ignore_patterns.iter().any(|p| path.contains(p.as_str()))
    }

    fn is_under_build_path(&self, path: &str) -> bool {
        Path::new(path).starts_with(&self.build_path)
    }

    fn should_ignore_lib(&self, path: &str) -> bool {
        if path == "/etc/ld.so.cache" || is_dynamic_linker(path) {
            return true;
        }
        self.is_under_build_path(path) || self.should_ignore_file(path)
    }

    fn should_ignore_header(&self, path: &str) -> bool {
        !path.starts_with('/') || self.is_under_build_path(path) || self.should_ignore_file(path)
    }

    fn should_ignore_executable(&self, path: &str) -> bool {
        if !path.starts_with('/') {
            return true;
        }
        if IGNORED_EXECUTABLES.contains(&path) {
            return true;
        }
        self.is_under_build_path(path) || self.should_ignore_file(path)
    }

    fn should_ignore_artifact(&self, path: &str) -> bool {
        if path.contains("CMakeFiles/")
            || path.contains("CMakeCache.txt")
            || path.contains("cmake_install.cmake")
            || path.contains("Makefile")
        {
            return true;
        }
        if path.ends_with(".o") {
            return true;
        }
        if path.contains(".tmp") || path.contains(".temp") {
            return true;
        }
        self.should_ignore_file(path)
    }
}

/// Whether the final extension marks a header file.
fn is_header_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| HEADER_EXTENSIONS.contains(&ext))
}

fn is_dynamic_linker(path: &str) -> bool {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    name.starts_with("ld-linux") || name == "ld.so" || name.starts_with("ld.so.")
}

fn owner_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o100 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Temp dir outside `/tmp`: the default ignore patterns would swallow
    /// every path created by the stock `TempDir::new`.
    fn test_dir() -> TempDir {
        let base = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/trace-tests");
        fs::create_dir_all(&base).unwrap();
        tempfile::Builder::new()
            .prefix("trace-test-")
            .tempdir_in(&base)
            .unwrap()
    }

    /// A parser whose build path is a directory that exists but contains
    /// nothing relevant, so nothing is excluded as "under the build path"
    /// unless a test puts it there.
    fn parser_with_build_dir() -> (TempDir, TraceParser) {
        let build = test_dir();
        let parser = TraceParser::new(build.path().to_path_buf());
        (build, parser)
    }

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    fn make_executable(path: &Path) {
        touch(path);
        let mut perms = fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).unwrap();
    }

    // ------------------------------------------------------------------
    // libraries
    // ------------------------------------------------------------------

    #[test]
    fn lib_extraction_finds_shared_and_static() {
        let (_build, parser) = parser_with_build_dir();
        let libs_dir = test_dir();

        let shared = libs_dir.path().join("libz.so.1");
        let archive = libs_dir.path().join("libfoo.a");
        touch(&shared);
        touch(&archive);

        let trace = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_RDONLY|O_CLOEXEC) = 3\n\
             1234  openat(AT_FDCWD, \"{}\", O_RDONLY) = 4\n",
            shared.display(),
            archive.display()
        );

        let libs = parser.parse_lib_files(&trace);
        assert!(libs.contains(shared.to_str().unwrap()));
        assert!(libs.contains(archive.to_str().unwrap()));
    }

    #[test]
    fn lib_extraction_skips_missing_files() {
        let (_build, parser) = parser_with_build_dir();
        let trace = "1234  openat(AT_FDCWD, \"/no/such/libgone.so\", O_RDONLY) = -1 ENOENT\n";
        assert!(parser.parse_lib_files(trace).is_empty());
    }

    #[test]
    fn lib_extraction_rejects_ld_so_cache() {
        let (_build, parser) = parser_with_build_dir();
        // The file genuinely exists on Linux hosts; the explicit reject
        // must keep it out regardless.
        let trace = "1234  openat(AT_FDCWD, \"/etc/ld.so.cache\", O_RDONLY|O_CLOEXEC) = 3\n";
        assert!(parser.parse_lib_files(trace).is_empty());
    }

    #[test]
    fn lib_extraction_rejects_build_path() {
        let (build, parser) = parser_with_build_dir();
        let inside = build.path().join("libmine.so");
        touch(&inside);

        let trace = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_RDONLY) = 3\n",
            inside.display()
        );
        assert!(parser.parse_lib_files(&trace).is_empty());
    }

    #[test]
    fn dynamic_linker_names() {
        assert!(is_dynamic_linker("/lib64/ld-linux-x86-64.so.2"));
        assert!(is_dynamic_linker("/lib/ld.so.1"));
        assert!(!is_dynamic_linker("/usr/lib/libdl.so.2"));
    }

    // ------------------------------------------------------------------
    // headers
    // ------------------------------------------------------------------

    #[test]
    fn header_extraction_accepts_plain_headers() {
        let (_build, parser) = parser_with_build_dir();
        let include = test_dir();
        let header = include.path().join("api.h");
        let hpp = include.path().join("api.hpp");
        touch(&header);
        touch(&hpp);

        let trace = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_RDONLY) = 3\n\
             1234  openat(AT_FDCWD, \"{}\", O_RDONLY) = 4\n",
            header.display(),
            hpp.display()
        );

        let headers = parser.parse_header_files(&trace);
        assert!(headers.contains(header.to_str().unwrap()));
        assert!(headers.contains(hpp.to_str().unwrap()));
    }

    #[test]
    fn precompiled_header_is_not_a_header() {
        let (_build, parser) = parser_with_build_dir();
        let include = test_dir();
        let gch = include.path().join("api.h.gch");
        touch(&gch);

        let trace = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_RDONLY) = 3\n",
            gch.display()
        );
        assert!(parser.parse_header_files(&trace).is_empty());
    }

    #[test]
    fn relative_header_paths_are_rejected() {
        let (_build, parser) = parser_with_build_dir();
        let trace = "1234  openat(AT_FDCWD, \"local.h\", O_RDONLY) = 3\n";
        assert!(parser.parse_header_files(trace).is_empty());
    }

    #[test]
    fn header_under_build_path_is_rejected() {
        let (build, parser) = parser_with_build_dir();
        let header = build.path().join("config.h");
        touch(&header);

        let trace = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_RDONLY) = 3\n",
            header.display()
        );
        assert!(parser.parse_header_files(&trace).is_empty());
    }

    #[test]
    fn header_extension_predicate() {
        assert!(is_header_path("/usr/include/stdio.h"));
        assert!(is_header_path("/usr/include/c++/vector.hpp"));
        assert!(is_header_path("/usr/include/legacy.H"));
        assert!(!is_header_path("/usr/include/stdio.h.gch"));
        assert!(!is_header_path("/usr/lib/libz.so"));
        assert!(!is_header_path("/usr/include/noext"));
    }

    // ------------------------------------------------------------------
    // executables
    // ------------------------------------------------------------------

    #[test]
    fn executable_extraction_reads_execve_lines() {
        let (_build, parser) = parser_with_build_dir();
        let bin = test_dir();
        let gcc = bin.path().join("gcc");
        make_executable(&gcc);

        let trace = format!(
            "1234  execve(\"{}\", [\"gcc\", \"-c\", \"main.c\"], 0x7ffc env) = 0\n",
            gcc.display()
        );

        let execs = parser.parse_executables(&trace);
        assert!(execs.contains(gcc.to_str().unwrap()));
    }

    #[test]
    fn executable_under_build_path_is_rejected() {
        let (build, parser) = parser_with_build_dir();
        let helper = build.path().join("gen-version");
        make_executable(&helper);

        let trace = format!(
            "1234  execve(\"{}\", [\"gen-version\"], 0x7ffc env) = 0\n",
            helper.display()
        );
        assert!(parser.parse_executables(&trace).is_empty());
    }

    #[test]
    fn shell_utilities_are_ignored() {
        let (_build, parser) = parser_with_build_dir();
        // /bin/sh exists on any host running these tests.
        let trace = "1234  execve(\"/bin/sh\", [\"sh\", \"-c\", \"true\"], 0x7ffc env) = 0\n";
        assert!(parser.parse_executables(trace).is_empty());
    }

    // ------------------------------------------------------------------
    // artifacts
    // ------------------------------------------------------------------

    #[test]
    fn artifact_from_resolved_dirfd_line() {
        let (build, parser) = parser_with_build_dir();
        fs::create_dir(build.path().join("bin")).unwrap();
        let tool = build.path().join("bin/tool");
        make_executable(&tool);

        let trace = format!(
            "1234  openat(AT_FDCWD<{}>, \"bin/tool\", O_WRONLY|O_CREAT|O_TRUNC, 0777) = 3\n",
            build.path().display()
        );

        let artifacts = parser.detect_build_artifacts(&trace);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, "bin/tool");
        assert_eq!(artifacts[0].kind, ArtifactKind::Executable);
        assert_eq!(artifacts[0].hash.len(), 64);
    }

    #[test]
    fn shared_library_artifact_without_exec_bit() {
        let (build, parser) = parser_with_build_dir();
        fs::create_dir(build.path().join("lib")).unwrap();
        let lib = build.path().join("lib/libx.so.2");
        touch(&lib);

        let trace = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_WRONLY|O_CREAT, 0644) = 3\n",
            lib.display()
        );

        let artifacts = parser.detect_build_artifacts(&trace);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, "lib/libx.so.2");
        assert_eq!(artifacts[0].kind, ArtifactKind::SharedLibrary);
    }

    #[test]
    fn plain_data_file_is_not_an_artifact() {
        let (build, parser) = parser_with_build_dir();
        let data = build.path().join("output.dat");
        touch(&data);

        let trace = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_WRONLY|O_CREAT, 0644) = 3\n",
            data.display()
        );
        assert!(parser.detect_build_artifacts(&trace).is_empty());
    }

    #[test]
    fn object_files_and_cmake_noise_are_ignored() {
        let (build, parser) = parser_with_build_dir();
        let obj = build.path().join("main.o");
        make_executable(&obj);
        fs::create_dir_all(build.path().join("CMakeFiles")).unwrap();
        let cmake = build.path().join("CMakeFiles/probe");
        make_executable(&cmake);

        let trace = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_WRONLY|O_CREAT, 0755) = 3\n\
             1234  openat(AT_FDCWD, \"{}\", O_WRONLY|O_CREAT, 0755) = 4\n",
            obj.display(),
            cmake.display()
        );
        assert!(parser.detect_build_artifacts(&trace).is_empty());
    }

    #[test]
    fn creat_line_requires_existing_file() {
        let (build, parser) = parser_with_build_dir();
        // Created then deleted before detection ran.
        let trace = "1234  creat(\"transient/name\", 0755) = 3\n";
        let _ = build;
        assert!(parser.detect_build_artifacts(trace).is_empty());
    }

    #[test]
    fn artifact_outside_build_path_stays_absolute() {
        let (_build, parser) = parser_with_build_dir();
        let elsewhere = test_dir();
        let tool = elsewhere.path().join("installed-tool");
        make_executable(&tool);

        let trace = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_WRONLY|O_CREAT, 0755) = 3\n",
            tool.display()
        );

        let artifacts = parser.detect_build_artifacts(&trace);
        assert_eq!(artifacts.len(), 1);
        assert!(Path::new(&artifacts[0].path).is_absolute());
        assert!(!artifacts[0].path.contains(".."));
    }

    #[test]
    fn duplicate_creations_collapse() {
        let (build, parser) = parser_with_build_dir();
        let tool = build.path().join("tool");
        make_executable(&tool);

        let line = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_WRONLY|O_CREAT, 0755) = 3\n",
            tool.display()
        );
        let trace = format!("{line}{line}{line}");

        assert_eq!(parser.detect_build_artifacts(&trace).len(), 1);
    }

    #[test]
    fn custom_ignore_pattern_applies() {
        let (_build, mut parser) = parser_with_build_dir();
        let libs_dir = test_dir();
        let lib = libs_dir.path().join("libz.so");
        touch(&lib);

        parser.add_ignore_pattern(libs_dir.path().to_string_lossy().into_owned());

        let trace = format!(
            "1234  openat(AT_FDCWD, \"{}\", O_RDONLY) = 3\n",
            lib.display()
        );
        assert!(parser.parse_lib_files(&trace).is_empty());
    }
}
