//! Build-environment preparation
//!
//! Runs before the traced build, on the coordinator thread, while the
//! process is still single-threaded (the env mutations below require that).
//! Every step here is best-effort: a failed step degrades the record, it
//! never aborts the build.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use repro_core::Canonicalizer;
use repro_platform as platform;

use crate::info::BuildInfo;
use crate::payload;

/// Prepare the environment the build children will inherit:
/// `SOURCE_DATE_EPOCH`, the interceptor control variables, reproducibility
/// compiler flags, and the preloaded interceptor itself.
pub fn prepare_environment(info: &mut BuildInfo) {
    info!("preparing build environment");

    platform::set_source_date_epoch(&info.build_timestamp);

    platform::export_var(
        "REPROBUILD_LOG_GIT_CLONES",
        &info.commit_log_path.to_string_lossy(),
    );
    platform::export_var("REPROBUILD_STAGE", "build");

    set_compiler_options(info);

    match payload::stage_interceptor(&info.log_dir) {
        Ok(lib_path) => {
            platform::prepend_var("LD_PRELOAD", &lib_path.to_string_lossy());
            info.interceptor_lib_path = Some(lib_path);
        }
        Err(e) => {
            warn!(error = %e, "interceptor staging failed, build tracking may be incomplete");
        }
    }
}

/// Compose the reproducibility flags and append them to every compiler
/// flag variable plus the interceptor's own channel.
fn set_compiler_options(info: &BuildInfo) {
    info!("setting compiler options for reproducible builds");

    let flags = format!(
        "-ffile-prefix-map={}=. -frandom-seed={}",
        info.build_path.display(),
        info.random_seed
    );

    for var in ["CFLAGS", "CXXFLAGS", "CPPFLAGS", "REPROBUILD_COMPILER_FLAGS"] {
        platform::append_var(var, &flags);
    }
}

/// Canonicalize the Makefile a `make` build will read, when one can be
/// located. Non-make builds and missing Makefiles are not an error.
pub fn fix_makefile(info: &BuildInfo) {
    if !info.build_command.split_whitespace().any(|tok| tok == "make") {
        return;
    }

    let dir = makefile_directory(&info.build_command, &info.build_path);

    let Some(makefile) = find_makefile(&dir) else {
        debug!(dir = %dir.display(), "no Makefile found to canonicalize");
        return;
    };

    info!(path = %makefile.display(), "canonicalizing Makefile");
    let canon = Canonicalizer::with_default_rules();
    if let Err(e) = canon.apply_to_file(&makefile) {
        warn!(path = %makefile.display(), error = %e, "Makefile canonicalization failed");
    }
}

/// Directory the Makefile lives in: a leading `cd <dir> && …` names it,
/// otherwise the build path is used.
fn makefile_directory(build_command: &str, build_path: &Path) -> PathBuf {
    let Some((first, _)) = build_command.split_once("&&") else {
        return build_path.to_path_buf();
    };

    let mut tokens = first.split_whitespace();
    if tokens.next() != Some("cd") {
        return build_path.to_path_buf();
    }

    match tokens.next() {
        Some(dir) => {
            let dir = dir.trim_matches('"');
            let path = Path::new(dir);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                build_path.join(path)
            }
        }
        None => build_path.to_path_buf(),
    }
}

/// First existing of `Makefile`, `makefile`, `GNUmakefile`.
fn find_makefile(dir: &Path) -> Option<PathBuf> {
    ["Makefile", "makefile", "GNUmakefile"]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn makefile_directory_from_cd_prefix() {
        let base = Path::new("/base");
        assert_eq!(
            makefile_directory("cd /src/project && make all", base),
            Path::new("/src/project")
        );
        assert_eq!(
            makefile_directory("cd sub && make", base),
            Path::new("/base/sub")
        );
        assert_eq!(makefile_directory("make all", base), Path::new("/base"));
        assert_eq!(
            makefile_directory("echo hi && make", base),
            Path::new("/base")
        );
    }

    #[test]
    fn find_makefile_prefers_capitalized() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("makefile"), "a:\n").unwrap();
        fs::write(temp.path().join("Makefile"), "b:\n").unwrap();

        let found = find_makefile(temp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "Makefile");
    }

    #[test]
    fn find_makefile_falls_back_to_gnumakefile() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("GNUmakefile"), "a:\n").unwrap();

        let found = find_makefile(temp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "GNUmakefile");
    }

    #[test]
    fn find_makefile_none_when_missing() {
        let temp = TempDir::new().unwrap();
        assert!(find_makefile(temp.path()).is_none());
    }

    #[test]
    fn fix_makefile_rewrites_wildcard() {
        let temp = TempDir::new().unwrap();
        let makefile = temp.path().join("Makefile");
        fs::write(&makefile, "SRCS = $(wildcard *.c)\nall: $(SRCS)\n").unwrap();

        let mut info = BuildInfo::new(
            "make all".to_string(),
            PathBuf::from("out.yaml"),
            temp.path().to_path_buf(),
        );
        info.build_path = temp.path().to_path_buf();

        fix_makefile(&info);

        let content = fs::read_to_string(&makefile).unwrap();
        assert!(content.starts_with("SRCS = $(sort $(wildcard *.c))\n"));
        assert!(content.contains("all: $(SRCS)"));
    }

    #[test]
    fn fix_makefile_ignores_non_make_commands() {
        let temp = TempDir::new().unwrap();
        let makefile = temp.path().join("Makefile");
        let original = "SRCS = $(wildcard *.c)\n";
        fs::write(&makefile, original).unwrap();

        let mut info = BuildInfo::new(
            "cmake --build .".to_string(),
            PathBuf::from("out.yaml"),
            temp.path().to_path_buf(),
        );
        info.build_path = temp.path().to_path_buf();

        fix_makefile(&info);

        assert_eq!(fs::read_to_string(&makefile).unwrap(), original);
    }
}
