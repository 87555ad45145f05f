//! Version numbers of the form `major.minor`, optionally with a prerelease tag.

use crate::migration::MigrationError;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Version recorded for a component that has never been installed.
pub const NOT_INSTALLED: &str = "0.0";

/// Kind of prerelease, in release order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum PrereleaseKind {
    Dev,
    Alpha,
    Beta,
    Candidate,
}

impl PrereleaseKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "dev" => Some(Self::Dev),
            "a" | "alpha" => Some(Self::Alpha),
            "b" | "beta" => Some(Self::Beta),
            "c" | "rc" | "pre" | "preview" => Some(Self::Candidate),
            _ => None,
        }
    }
}

/// Prerelease marker such as `a1`, `dev3` or `rc`. A missing serial is 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Prerelease {
    kind: PrereleaseKind,
    serial: u64,
}

/// A declared component version.
///
/// Only `major.minor` is accepted, optionally followed by a prerelease tag
/// (`2.0a1`, `2.0.dev3`, `2.0-rc1`). A patch number such as `1.2.3` is
/// rejected. Prereleases of the same `major.minor` sort as
/// `dev < a < b < rc`, and a release sorts after all of them.
#[derive(Debug, Clone)]
pub struct VersionNumber {
    major: u32,
    minor: u32,
    prerelease: Option<Prerelease>,
    text: String,
}

impl VersionNumber {
    /// Parse a declared version string.
    pub fn parse(text: &str) -> Result<Self, MigrationError> {
        let invalid = |reason: &str| MigrationError::InvalidVersion {
            version: text.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = text.trim();
        let (major, rest) = split_digits(trimmed);
        let major = parse_number(major).ok_or_else(|| invalid("expected a numeric major version"))?;
        let rest = rest
            .strip_prefix('.')
            .ok_or_else(|| invalid("expected major.minor"))?;
        let (minor, rest) = split_digits(rest);
        let minor = parse_number(minor).ok_or_else(|| invalid("expected a numeric minor version"))?;

        let prerelease = if rest.is_empty() {
            None
        } else {
            let suffix = rest.strip_prefix(|c: char| matches!(c, '.' | '-' | '_')).unwrap_or(rest);
            match suffix.chars().next() {
                Some(c) if c.is_ascii_alphabetic() => {
                    let split = suffix
                        .find(|c: char| !c.is_ascii_alphabetic())
                        .unwrap_or(suffix.len());
                    let (tag, serial) = suffix.split_at(split);
                    let kind = PrereleaseKind::from_tag(&tag.to_ascii_lowercase())
                        .ok_or_else(|| invalid("unknown prerelease marker"))?;
                    let serial = if serial.is_empty() {
                        0
                    } else {
                        serial
                            .parse::<u64>()
                            .map_err(|_| invalid("malformed prerelease marker"))?
                    };
                    Some(Prerelease { kind, serial })
                }
                Some(_) => {
                    return Err(invalid(
                        "only major.minor is allowed unless the version is a prerelease",
                    ))
                }
                None => return Err(invalid("trailing separator")),
            }
        };

        Ok(Self {
            major,
            minor,
            prerelease,
            text: trimmed.to_string(),
        })
    }

    /// Extract `(major, minor)` from an installed version string.
    ///
    /// Installed versions come from persisted records and may carry patch or
    /// build information, which is ignored here. An empty string counts as
    /// never installed.
    pub fn major_minor_of(installed: &str) -> Result<(u32, u32), MigrationError> {
        let trimmed = installed.trim();
        if trimmed.is_empty() {
            return Ok((0, 0));
        }

        let mut segments = trimmed.split('.');
        let major = segments
            .next()
            .map(|s| split_digits(s).0)
            .and_then(parse_number)
            .ok_or_else(|| MigrationError::InvalidVersion {
                version: installed.to_string(),
                reason: "installed version has no numeric major part".to_string(),
            })?;
        let minor = segments
            .next()
            .map(|s| split_digits(s).0)
            .and_then(parse_number)
            .unwrap_or(0);

        Ok((major, minor))
    }

    /// Major version.
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Minor version.
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Whether this version carries a prerelease tag.
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// The version as it was declared.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// `(major, minor)` pair used for installed-version comparisons.
    pub fn major_minor(&self) -> (u32, u32) {
        (self.major, self.minor)
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn parse_number(digits: &str) -> Option<u32> {
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

impl FromStr for VersionNumber {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for VersionNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionNumber {}

impl Hash for VersionNumber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.prerelease.hash(state);
    }
}

impl PartialOrd for VersionNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}
