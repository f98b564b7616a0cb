//! Package attribution for raw file paths
//!
//! Given a file the build consumed, find out which distribution package
//! owns it. Ownership queries go through the host package manager's CLI
//! (`dpkg`/`rpm`); files nobody owns become `custom` packages identified by
//! content hash alone.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, warn};

use repro_platform::PackageManager;

use crate::hash::file_sha256;
use crate::package::{DependencyPackage, Origin};
use crate::{CoreError, Result};

/// Resolve a raw file path to a dependency package.
///
/// Never fails: unresolvable files come back as invalid packages whose
/// `hash` field carries an `ERROR: <reason>` marker, so callers can log and
/// move on (`is_valid` filters them out of records).
pub async fn from_raw_file(raw_path: &Path, pkg_mgr: PackageManager) -> DependencyPackage {
    match resolve(raw_path, pkg_mgr).await {
        Ok(package) => package,
        Err(e) => {
            debug!(path = %raw_path.display(), error = %e, "resolution aborted");
            DependencyPackage::invalid(raw_path.to_string_lossy(), e)
        }
    }
}

async fn resolve(raw_path: &Path, pkg_mgr: PackageManager) -> Result<DependencyPackage> {
    if !raw_path.exists() {
        return Err(CoreError::Subprocess {
            command: "stat".into(),
            detail: format!("file does not exist: {}", raw_path.display()),
        });
    }

    let real_path = std::fs::canonicalize(raw_path)?;

    let owned = match pkg_mgr {
        PackageManager::Apt => query_dpkg(raw_path, &real_path).await?,
        PackageManager::Dnf | PackageManager::Yum => {
            query_rpm(raw_path, &real_path, Origin::from(pkg_mgr)).await?
        }
        // No supported ownership database; everything is custom.
        PackageManager::Pacman | PackageManager::Unknown => None,
    };

    if let Some((name, origin, version)) = owned {
        let hash = file_sha256(&real_path)?;
        return Ok(DependencyPackage::new(
            name,
            origin,
            real_path.to_string_lossy(),
            version,
            hash,
        ));
    }

    // Not owned by any installed package: identify by basename and hash.
    let name = real_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| real_path.to_string_lossy().into_owned());
    let hash = file_sha256(&real_path)?;

    Ok(DependencyPackage::new(
        name,
        Origin::Custom,
        real_path.to_string_lossy(),
        "custom",
        hash,
    ))
}

/// `dpkg -S` ownership lookup, raw path first, canonical path second.
///
/// Returns `Ok(None)` when no package owns the file.
async fn query_dpkg(
    raw_path: &Path,
    real_path: &Path,
) -> Result<Option<(String, Origin, String)>> {
    let mut name = dpkg_owner(raw_path).await?;
    if name.is_empty() {
        name = dpkg_owner(real_path).await?;
    }
    if name.is_empty() {
        return Ok(None);
    }

    let version = run_capture("dpkg-query", &["-W", "-f=${Version}\n", &name]).await?;
    let version = first_line(&version);
    if version.is_empty() {
        return Err(CoreError::Subprocess {
            command: format!("dpkg-query -W {name}"),
            detail: "empty version".into(),
        });
    }

    Ok(Some((name, Origin::Apt, version)))
}

/// One `dpkg -S` query. A diversion line means the raw path is not the
/// canonical name and the caller should retry with the real path.
async fn dpkg_owner(path: &Path) -> Result<String> {
    let output = run_capture("dpkg", &["-S", &path.to_string_lossy()]).await?;
    let line = first_line(&output);

    if line.is_empty() || line.starts_with("diversion by") {
        return Ok(String::new());
    }

    // "libc6:amd64: /lib/x86_64-linux-gnu/libc.so.6". A file can be listed
    // for several packages; the first line wins.
    Ok(line.split(':').next().unwrap_or_default().to_string())
}

/// `rpm -qf` ownership lookup, raw path first, canonical path second.
async fn query_rpm(
    raw_path: &Path,
    real_path: &Path,
    origin: Origin,
) -> Result<Option<(String, Origin, String)>> {
    let mut owner = rpm_owner(raw_path).await?;
    if owner.is_empty() {
        owner = rpm_owner(real_path).await?;
    }
    if owner.is_empty() {
        return Ok(None);
    }

    let name = first_line(&run_capture("rpm", &["-q", "--qf", "%{NAME}\n", &owner]).await?);
    if name.is_empty() {
        return Err(CoreError::Subprocess {
            command: format!("rpm -q {owner}"),
            detail: "empty package name".into(),
        });
    }

    let version = first_line(
        &run_capture("rpm", &["-q", "--qf", "%{VERSION}-%{RELEASE}\n", &owner]).await?,
    );
    if version.is_empty() {
        return Err(CoreError::Subprocess {
            command: format!("rpm -q {owner}"),
            detail: "empty version".into(),
        });
    }

    Ok(Some((name, origin, version)))
}

async fn rpm_owner(path: &Path) -> Result<String> {
    let output = run_capture("rpm", &["-qf", &path.to_string_lossy()]).await?;
    let line = first_line(&output);

    if line.is_empty() || line.contains("is not owned by") {
        return Ok(String::new());
    }

    Ok(line.to_string())
}

/// Run a query command and capture stdout.
///
/// A non-zero exit is the package manager's way of saying "not found" and
/// yields whatever stdout there was; only a spawn failure (missing binary)
/// is an error, because that means every lookup on this host would fail.
async fn run_capture(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| CoreError::Subprocess {
            command: format!("{program} {}", args.join(" ")),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        warn!(
            program,
            status = ?output.status.code(),
            "package query exited non-zero"
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or_default().trim().to_string()
}
