//! Dependency package identity

use std::fmt;

use serde::{Deserialize, Serialize};

/// Provenance of a dependency package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Apt,
    Dnf,
    Yum,
    Pacman,
    /// Not owned by any installed package.
    #[default]
    Custom,
}

impl Origin {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Origin::Apt => "apt",
            Origin::Dnf => "dnf",
            Origin::Yum => "yum",
            Origin::Pacman => "pacman",
            Origin::Custom => "custom",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An external input file resolved to a package identity.
///
/// Invalid packages carry their failure reason in the `hash` field, prefixed
/// with `ERROR: `; `is_valid` is how callers tell the two apart.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyPackage {
    pub name: String,
    pub origin: Origin,
    /// Canonical absolute path of the file (the raw path for invalid ones).
    pub path: String,
    /// Package version, or the literal `custom` for unowned files.
    pub version: String,
    /// Hex SHA-256 of the file, or `ERROR: <reason>` for failed resolution.
    pub hash: String,
}

impl DependencyPackage {
    pub fn new(
        name: impl Into<String>,
        origin: Origin,
        path: impl Into<String>,
        version: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            origin,
            path: path.into(),
            version: version.into(),
            hash: hash.into(),
        }
    }

    /// Build the failure marker for a file whose resolution was aborted.
    pub fn invalid(raw_path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            path: raw_path.into(),
            hash: format!("ERROR: {reason}"),
            ..Self::default()
        }
    }

    /// A package is valid iff name, version and hash are all non-empty.
    ///
    /// The `ERROR: ` marker never co-exists with a name, so invalid
    /// packages always fail this test.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.version.is_empty() && !self.hash.is_empty()
    }

    /// Unique identifier in `name@version` form.
    pub fn unique_id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl fmt::Display for DependencyPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DependencyPackage{{name: {:?}, path: {:?}, version: {:?}, hash: {:?}}}",
            self.name, self.path, self.version, self.hash
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_package() -> DependencyPackage {
        DependencyPackage::new(
            "zlib1g",
            Origin::Apt,
            "/usr/lib/x86_64-linux-gnu/libz.so.1.3",
            "1:1.3.dfsg-3.1",
            "a".repeat(64),
        )
    }

    #[test]
    fn validity_requires_name_version_hash() {
        assert!(valid_package().is_valid());

        let mut p = valid_package();
        p.name.clear();
        assert!(!p.is_valid());

        let mut p = valid_package();
        p.version.clear();
        assert!(!p.is_valid());

        let mut p = valid_package();
        p.hash.clear();
        assert!(!p.is_valid());
    }

    #[test]
    fn invalid_marker_is_not_valid() {
        let p = DependencyPackage::invalid("/missing/file", "file does not exist");
        assert!(!p.is_valid());
        assert!(p.hash.starts_with("ERROR: "));
        assert_eq!(p.path, "/missing/file");
    }

    #[test]
    fn equality_is_full_field() {
        let a = valid_package();
        let mut b = valid_package();
        assert_eq!(a, b);

        b.origin = Origin::Custom;
        assert_ne!(a, b);
    }

    #[test]
    fn unique_id_form() {
        assert_eq!(valid_package().unique_id(), "zlib1g@1:1.3.dfsg-3.1");
    }
}
