//! Package-manager detection

use std::fmt;

/// The package manager a dependency file can be attributed through.
///
/// Detection is purely name-based on the distribution string; it never
/// probes for binaries, so a record taken on a minimal container still
/// carries the right tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Pacman,
    Unknown,
}

impl PackageManager {
    /// Map a distribution string (as produced by `distribution()`) to the
    /// package manager expected on that distribution.
    pub fn detect(distribution: &str) -> Self {
        let distro = distribution.to_lowercase();

        if distro.contains("ubuntu") || distro.contains("debian") {
            PackageManager::Apt
        } else if distro.contains("fedora") {
            PackageManager::Dnf
        } else if distro.contains("centos") {
            PackageManager::Yum
        } else if distro.contains("arch") {
            PackageManager::Pacman
        } else {
            PackageManager::Unknown
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Pacman => "pacman",
            PackageManager::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_from_distribution_strings() {
        assert_eq!(
            PackageManager::detect("Ubuntu 24.04.1 LTS"),
            PackageManager::Apt
        );
        assert_eq!(
            PackageManager::detect("Debian GNU/Linux 12 (bookworm)"),
            PackageManager::Apt
        );
        assert_eq!(
            PackageManager::detect("Fedora Linux 40 (Workstation Edition)"),
            PackageManager::Dnf
        );
        assert_eq!(
            PackageManager::detect("CentOS Stream 9"),
            PackageManager::Yum
        );
        assert_eq!(PackageManager::detect("Arch Linux"), PackageManager::Pacman);
        assert_eq!(PackageManager::detect("Unknown"), PackageManager::Unknown);
        assert_eq!(PackageManager::detect(""), PackageManager::Unknown);
    }
}
