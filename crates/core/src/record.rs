//! The build record: manifest of everything a build consumed and produced
//!
//! # On-disk layout
//!
//! ```text
//! # Build Record for <project>
//! project: <name>
//! metadata: { architecture, distribution, build_cmd, ... }
//! dependencies:            # ascending by package name
//!   - { name, path, version, hash }
//! artifacts:
//!   - { path, hash, type }
//! git_commit_ids:          # only when non-empty
//!   - { repo, commit_id }
//! ```
//!
//! Dependencies are keyed by package name in memory; serialization walks the
//! map in key order, so the emitted YAML is deterministic for a given record.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use repro_platform::PackageManager;

use crate::package::{DependencyPackage, Origin};
use crate::{CoreError, Result};

/// Classification of a produced file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Executable,
    SharedLibrary,
}

/// A file created by the build, identified by content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// Relative to the build path when the file is inside it, else absolute.
    pub path: String,
    pub hash: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
}

impl BuildArtifact {
    pub fn new(path: impl Into<String>, hash: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            kind,
        }
    }
}

/// Host and invocation metadata captured at record time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RecordMetadata {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub distribution: String,
    #[serde(default)]
    pub build_cmd: String,
    #[serde(default)]
    pub build_path: String,
    #[serde(default)]
    pub build_timestamp: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub umask: String,
    #[serde(default)]
    pub random_seed: String,
}

/// The in-memory build manifest.
#[derive(Debug, Clone, Default)]
pub struct BuildRecord {
    pub project: String,
    pub metadata: RecordMetadata,
    /// Keyed by package name; inserting the same name twice keeps the
    /// later package.
    pub dependencies: BTreeMap<String, DependencyPackage>,
    pub artifacts: Vec<BuildArtifact>,
    /// Clone URL to commit hash, as observed by the interceptor.
    pub git_commit_ids: BTreeMap<String, String>,
}

impl BuildRecord {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    /// Insert a dependency. Invalid packages are dropped here so the rest
    /// of the record never has to re-check.
    pub fn add_dependency(&mut self, package: DependencyPackage) {
        if package.is_valid() {
            self.dependencies.insert(package.name.clone(), package);
        }
    }

    pub fn has_dependency(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn add_artifact(&mut self, artifact: BuildArtifact) {
        self.artifacts.push(artifact);
    }

    pub fn add_git_commit_id(&mut self, repo: impl Into<String>, commit: impl Into<String>) {
        self.git_commit_ids.insert(repo.into(), commit.into());
    }

    /// All dependencies, ascending by package name.
    pub fn all_dependencies(&self) -> impl Iterator<Item = &DependencyPackage> {
        self.dependencies.values()
    }

    /// Structural equality for round-trip checks: metadata, the dependency
    /// set (per-name, over the persisted fields), the artifact list, and
    /// the commit map. `origin` is not part of the on-disk schema and is
    /// therefore excluded.
    pub fn matches(&self, other: &BuildRecord) -> bool {
        if self.project != other.project || self.metadata != other.metadata {
            return false;
        }

        if self.dependencies.len() != other.dependencies.len() {
            return false;
        }
        for (name, dep) in &self.dependencies {
            let Some(theirs) = other.dependencies.get(name) else {
                return false;
            };
            if dep.path != theirs.path || dep.version != theirs.version || dep.hash != theirs.hash
            {
                return false;
            }
        }

        self.artifacts == other.artifacts && self.git_commit_ids == other.git_commit_ids
    }

    /// Write the record as YAML, preceded by a project header comment.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = RecordFile::from_record(self);
        let yaml = serde_yaml::to_string(&file)?;

        let mut out = format!("# Build Record for {}\n", self.project);
        out.push_str(&yaml);
        fs::write(path, out)?;

        debug!(path = %path.display(), "build record written");
        Ok(())
    }

    /// Load a record written by `save_to_file`.
    ///
    /// Missing sections are tolerated; a dependency entry missing any of
    /// its four fields is a load error.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CoreError::RecordNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let file: RecordFile = serde_yaml::from_str(&content)?;
        Ok(file.into_record())
    }
}

// On-disk shape. Kept separate from `BuildRecord` so the in-memory maps can
// stay maps while the file keeps the list layout of the schema.

#[derive(Serialize, Deserialize)]
struct RecordFile {
    #[serde(default)]
    project: String,
    #[serde(default)]
    metadata: RecordMetadata,
    #[serde(default)]
    dependencies: Vec<DependencyEntry>,
    #[serde(default)]
    artifacts: Vec<BuildArtifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    git_commit_ids: Vec<CommitEntry>,
}

#[derive(Serialize, Deserialize)]
struct DependencyEntry {
    name: String,
    path: String,
    version: String,
    hash: String,
}

#[derive(Serialize, Deserialize)]
struct CommitEntry {
    repo: String,
    commit_id: String,
}

impl RecordFile {
    fn from_record(record: &BuildRecord) -> Self {
        Self {
            project: record.project.clone(),
            metadata: record.metadata.clone(),
            // BTreeMap iteration gives the name-ascending order the schema
            // promises.
            dependencies: record
                .dependencies
                .values()
                .map(|dep| DependencyEntry {
                    name: dep.name.clone(),
                    path: dep.path.clone(),
                    version: dep.version.clone(),
                    hash: dep.hash.clone(),
                })
                .collect(),
            artifacts: record.artifacts.clone(),
            git_commit_ids: record
                .git_commit_ids
                .iter()
                .map(|(repo, commit)| CommitEntry {
                    repo: repo.clone(),
                    commit_id: commit.clone(),
                })
                .collect(),
        }
    }

    fn into_record(self) -> BuildRecord {
        // `origin` is not persisted. Unowned files are recognizable by
        // their literal `custom` version; everything else is assumed to
        // come from the package manager of the recorded distribution.
        let host_origin = Origin::from(PackageManager::detect(&self.metadata.distribution));

        let mut record = BuildRecord::new(self.project);
        record.metadata = self.metadata;

        for entry in self.dependencies {
            let origin = if entry.version == "custom" {
                Origin::Custom
            } else {
                host_origin
            };
            record.add_dependency(DependencyPackage::new(
                entry.name,
                origin,
                entry.path,
                entry.version,
                entry.hash,
            ));
        }

        record.artifacts = self.artifacts;
        for entry in self.git_commit_ids {
            record.git_commit_ids.insert(entry.repo, entry.commit_id);
        }

        record
    }
}

impl From<PackageManager> for Origin {
    fn from(pkg_mgr: PackageManager) -> Self {
        match pkg_mgr {
            PackageManager::Apt => Origin::Apt,
            PackageManager::Dnf => Origin::Dnf,
            PackageManager::Yum => Origin::Yum,
            PackageManager::Pacman => Origin::Pacman,
            PackageManager::Unknown => Origin::Custom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn package(name: &str, version: &str) -> DependencyPackage {
        DependencyPackage::new(
            name,
            Origin::Apt,
            format!("/usr/lib/{name}.so"),
            version,
            "c".repeat(64),
        )
    }

    fn sample_record() -> BuildRecord {
        let mut record = BuildRecord::new("test_project");
        record.metadata = RecordMetadata {
            architecture: "x86_64".into(),
            distribution: "Ubuntu 24.04.1 LTS".into(),
            build_cmd: "make all".into(),
            build_path: "/home/user/project".into(),
            build_timestamp: "2024-06-01T12:00:00".into(),
            hostname: "builder".into(),
            locale: "C.UTF-8".into(),
            umask: "0022".into(),
            random_seed: "0".into(),
        };
        record.add_dependency(package("zlib", "1.3"));
        record.add_dependency(package("openssl", "1.1.1w"));
        record.add_artifact(BuildArtifact::new(
            "bin/tool",
            "a".repeat(64),
            ArtifactKind::Executable,
        ));
        record.add_artifact(BuildArtifact::new(
            "lib/libx.so.2",
            "b".repeat(64),
            ArtifactKind::SharedLibrary,
        ));
        record
    }

    #[test]
    fn invalid_dependencies_are_dropped() {
        let mut record = BuildRecord::new("p");
        record.add_dependency(DependencyPackage::invalid("/gone", "file does not exist"));
        assert!(record.dependencies.is_empty());
    }

    #[test]
    fn same_name_last_write_wins() {
        let mut record = BuildRecord::new("p");
        record.add_dependency(package("zlib", "1.2"));
        record.add_dependency(package("zlib", "1.3"));
        assert_eq!(record.dependencies.len(), 1);
        assert_eq!(record.dependencies["zlib"].version, "1.3");
    }

    #[test]
    fn dependencies_serialize_name_ascending() {
        let record = sample_record();
        let names: Vec<&str> = record.all_dependencies().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["openssl", "zlib"]);

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.yaml");
        record.save_to_file(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let openssl_pos = content.find("name: openssl").unwrap();
        let zlib_pos = content.find("name: zlib").unwrap();
        assert!(openssl_pos < zlib_pos);
    }

    #[test]
    fn save_load_roundtrip_matches() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.yaml");

        let record = sample_record();
        record.save_to_file(&path).unwrap();

        let loaded = BuildRecord::load_from_file(&path).unwrap();
        assert!(record.matches(&loaded));
        assert!(loaded.matches(&record));
    }

    #[test]
    fn resave_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("a.yaml");
        let second = temp.path().join("b.yaml");

        let record = sample_record();
        record.save_to_file(&first).unwrap();

        let loaded = BuildRecord::load_from_file(&first).unwrap();
        loaded.save_to_file(&second).unwrap();

        assert_eq!(
            fs::read_to_string(&first).unwrap(),
            fs::read_to_string(&second).unwrap()
        );
    }

    #[test]
    fn header_comment_names_project() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.yaml");
        sample_record().save_to_file(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Build Record for test_project\n"));
    }

    #[test]
    fn commit_ids_omitted_when_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.yaml");
        sample_record().save_to_file(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("git_commit_ids"));
    }

    #[test]
    fn commit_ids_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.yaml");

        let mut record = sample_record();
        record.add_git_commit_id(
            "https://example.com/dep.git",
            "0123456789abcdef0123456789abcdef01234567",
        );
        record.save_to_file(&path).unwrap();

        let loaded = BuildRecord::load_from_file(&path).unwrap();
        assert_eq!(
            loaded.git_commit_ids["https://example.com/dep.git"],
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert!(record.matches(&loaded));
    }

    #[test]
    fn custom_version_loads_as_custom_origin() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.yaml");

        let mut record = sample_record();
        record.add_dependency(DependencyPackage::new(
            "localtool",
            Origin::Custom,
            "/opt/localtool/bin/localtool",
            "custom",
            "d".repeat(64),
        ));
        record.save_to_file(&path).unwrap();

        let loaded = BuildRecord::load_from_file(&path).unwrap();
        assert_eq!(loaded.dependencies["localtool"].origin, Origin::Custom);
        assert_eq!(loaded.dependencies["zlib"].origin, Origin::Apt);
    }

    #[test]
    fn load_tolerates_missing_sections() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.yaml");
        fs::write(&path, "project: bare\n").unwrap();

        let loaded = BuildRecord::load_from_file(&path).unwrap();
        assert_eq!(loaded.project, "bare");
        assert!(loaded.dependencies.is_empty());
        assert!(loaded.artifacts.is_empty());
    }

    #[test]
    fn load_rejects_incomplete_dependency_entry() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.yaml");
        fs::write(
            &path,
            "dependencies:\n  - name: zlib\n    path: /usr/lib/libz.so\n",
        )
        .unwrap();

        assert!(BuildRecord::load_from_file(&path).is_err());
    }

    #[test]
    fn load_missing_file_is_record_not_found() {
        let result = BuildRecord::load_from_file(Path::new("/nonexistent/record.yaml"));
        assert!(matches!(result, Err(CoreError::RecordNotFound(_))));
    }

    #[test]
    fn matches_detects_dependency_drift() {
        let a = sample_record();

        let mut b = sample_record();
        b.dependencies.get_mut("zlib").unwrap().version = "1.4".into();
        assert!(!a.matches(&b));

        let mut c = sample_record();
        c.dependencies.remove("zlib");
        assert!(!a.matches(&c));

        let mut d = sample_record();
        d.metadata.hostname = "other".into();
        assert!(!a.matches(&d));

        let mut e = sample_record();
        e.artifacts.pop();
        assert!(!a.matches(&e));
    }
}
