//! Lenient server version parsing for dialect selection.
//!
//! Server versions are rarely strict semver (`16.2`, `8.0.35-0ubuntu0.22.04.1`,
//! `10.11.6-MariaDB-log`), so only the leading numeric components are used.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse the leading `major[.minor[.patch]]` of a version string.
    pub fn parse(raw: &str) -> Option<Self> {
        let start = raw.find(|c: char| c.is_ascii_digit())?;
        let mut parts = raw[start..]
            .split(|c: char| !c.is_ascii_digit())
            .take(3)
            .map(|p| p.parse::<u32>().ok());

        let major = parts.next()??;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self { major, minor, patch })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Half-open version interval `[min, below)`; unbounded on absent ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionRange {
    pub min: Option<ServerVersion>,
    pub below: Option<ServerVersion>,
}

impl VersionRange {
    /// Matches every version, including unknown ones.
    pub const fn any() -> Self {
        Self { min: None, below: None }
    }

    pub const fn at_least(min: ServerVersion) -> Self {
        Self { min: Some(min), below: None }
    }

    pub const fn below(max: ServerVersion) -> Self {
        Self { min: None, below: Some(max) }
    }

    pub fn is_any(&self) -> bool {
        self.min.is_none() && self.below.is_none()
    }

    pub fn contains(&self, raw: &str) -> bool {
        if self.is_any() {
            return true;
        }
        let Some(version) = ServerVersion::parse(raw) else {
            return false;
        };
        self.min.map_or(true, |min| version >= min) && self.below.map_or(true, |max| version < max)
    }
}
