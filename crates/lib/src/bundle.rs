//! Self-contained bundle creation
//!
//! A bundle packages everything a later re-verification needs that the
//! package manager cannot reproduce: the build tree, every custom-origin
//! dependency, and the record itself. The archive format follows the
//! output file's extension.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use repro_core::{BuildRecord, Origin};

use crate::{Result, TrackError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BundleFormat {
    TarGz,
    TarBz2,
    TarXz,
    Zip,
}

/// Stage the record's build tree and custom dependencies and archive them
/// at `bundle_path`.
pub fn create_bundle(record: &BuildRecord, bundle_path: &Path) -> Result<()> {
    let staging = tempfile::Builder::new()
        .prefix("reprobuild_tmp_")
        .tempdir()?;
    debug!(dir = %staging.path().display(), "created staging directory");

    stage_build_tree(record, staging.path())?;
    stage_custom_dependencies(record, staging.path())?;
    record.save_to_file(&staging.path().join("build_record.yaml"))?;

    let bundle_path = std::path::absolute(bundle_path)?;
    if let Some(parent) = bundle_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let (format, bundle_path) = match bundle_format(&bundle_path) {
        Some(format) => (format, bundle_path),
        None => {
            warn!(
                path = %bundle_path.display(),
                "unrecognized bundle extension, defaulting to .tar.gz"
            );
            let mut fallback = bundle_path.into_os_string();
            fallback.push(".tar.gz");
            (BundleFormat::TarGz, PathBuf::from(fallback))
        }
    };

    match format {
        BundleFormat::TarGz => write_tar_gz(staging.path(), &bundle_path)?,
        BundleFormat::Zip => write_zip(staging.path(), &bundle_path)?,
        BundleFormat::TarBz2 => system_tar("-cjf", staging.path(), &bundle_path)?,
        BundleFormat::TarXz => system_tar("-cJf", staging.path(), &bundle_path)?,
    }

    info!(path = %bundle_path.display(), "bundle created");
    Ok(())
}

/// Copy the recorded build tree into `<staging>/build`, when it still
/// exists.
fn stage_build_tree(record: &BuildRecord, staging: &Path) -> Result<()> {
    let build_path = &record.metadata.build_path;
    if build_path.is_empty() || !Path::new(build_path).exists() {
        warn!(path = %build_path, "build path does not exist, bundle will not contain it");
        return Ok(());
    }

    copy_tree(Path::new(build_path), &staging.join("build"))
}

/// Copy every custom-origin dependency into `<staging>/dependencies/<name>`.
fn stage_custom_dependencies(record: &BuildRecord, staging: &Path) -> Result<()> {
    let deps_dir = staging.join("dependencies");
    fs::create_dir_all(&deps_dir)?;

    let mut copied = 0usize;
    for dep in record.all_dependencies() {
        if dep.origin != Origin::Custom {
            continue;
        }

        let source = Path::new(&dep.path);
        if dep.path.is_empty() || !source.exists() {
            warn!(name = %dep.name, path = %dep.path, "custom dependency path does not exist");
            continue;
        }

        let dest = deps_dir.join(&dep.name);
        if source.is_dir() {
            copy_tree(source, &dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(source, &dest)?;
        }

        debug!(name = %dep.name, "copied custom dependency");
        copied += 1;
    }

    debug!(count = copied, "staged custom dependencies");
    Ok(())
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| TrackError::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir stays under its root");
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        } else {
            debug!(path = %entry.path().display(), "skipping non-regular file");
        }
    }
    Ok(())
}

/// Archive format from the output filename; `None` for unknown extensions.
fn bundle_format(path: &Path) -> Option<BundleFormat> {
    let name = path.file_name()?.to_string_lossy();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(BundleFormat::TarGz)
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        Some(BundleFormat::TarBz2)
    } else if name.ends_with(".tar.xz") {
        Some(BundleFormat::TarXz)
    } else if name.ends_with(".zip") {
        Some(BundleFormat::Zip)
    } else {
        None
    }
}

fn write_tar_gz(staging: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    builder.append_dir_all(".", staging)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

fn write_zip(staging: &Path, dest: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let file = File::create(dest)?;
    let mut writer = zip::ZipWriter::new(file);

    for entry in WalkDir::new(staging) {
        let entry = entry.map_err(|e| TrackError::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(staging)
            .expect("walkdir stays under its root");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative.to_string_lossy().into_owned();

        if entry.file_type().is_dir() {
            writer
                .add_directory(name, SimpleFileOptions::default())
                .map_err(|e| TrackError::Archive(e.to_string()))?;
        } else if entry.file_type().is_file() {
            let mode = entry
                .metadata()
                .map_err(|e| TrackError::Archive(e.to_string()))?
                .permissions()
                .mode();
            let options = SimpleFileOptions::default().unix_permissions(mode);
            writer
                .start_file(name, options)
                .map_err(|e| TrackError::Archive(e.to_string()))?;
            io::copy(&mut File::open(entry.path())?, &mut writer)?;
        }
    }

    writer
        .finish()
        .map_err(|e| TrackError::Archive(e.to_string()))?;
    Ok(())
}

/// bzip2 and xz have no encoder in the crate stack; the system tar does
/// the compression for those two formats.
fn system_tar(flag: &str, staging: &Path, dest: &Path) -> Result<()> {
    let status = std::process::Command::new("tar")
        .arg(flag)
        .arg(dest)
        .arg("-C")
        .arg(staging)
        .arg(".")
        .status()?;

    if !status.success() {
        return Err(TrackError::Archive(format!(
            "tar exited with code {:?}",
            status.code()
        )));
    }
    Ok(())
}
