//! Adaptor/package specifiers: `name`, `name@version`, `name=path`, `name@version=path`.

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A leniently parsed `major.minor.patch` version.
///
/// Missing or unparsable segments default to `0`, so `"2"` is `2.0.0` and
/// `"1.x"` is `1.0.0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let text = text.strip_prefix('v').unwrap_or(text);
        let mut segments = text.split('.').map(leading_number);
        Self {
            major: segments.next().unwrap_or(0),
            minor: segments.next().unwrap_or(0),
            patch: segments.next().unwrap_or(0),
        }
    }

    /// `major.minor`, the granularity at which unsupported releases are grouped.
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// Whether `self` is presumed to share a limitation recorded for `recorded`:
    /// an older major, or the same major with the same-or-older minor.
    pub fn within_release_of(&self, recorded: &Version) -> bool {
        self.major < recorded.major
            || (self.major == recorded.major && self.minor <= recorded.minor)
    }
}

fn leading_number(segment: &str) -> u64 {
    let digits = segment
        .find(|c: char| !c.is_ascii_digit())
        .map_or(segment, |end| &segment[..end]);
    digits.parse().unwrap_or(0)
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::parse(&text))
    }
}

/// A parsed package or adaptor specifier.
///
/// Scoped names keep their leading `@` (`@org/pkg@1.2.3` has name `@org/pkg`).
/// The raw text is retained because metadata keys hash it verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PackageSpecifier {
    raw: String,
    name: String,
    version: Option<String>,
    path: Option<String>,
}

impl PackageSpecifier {
    pub fn parse(text: &str) -> Result<Self, CacheError> {
        let raw = text.trim();
        let (identity, path) = match raw.split_once('=') {
            Some((identity, path)) => (identity, Some(path.to_string())),
            None => (raw, None),
        };

        // Skip a scope marker so `@org/pkg` isn't read as an empty name at version `org/pkg`.
        let version_at = identity
            .char_indices()
            .skip(1)
            .filter(|&(_, c)| c == '@')
            .map(|(idx, _)| idx)
            .last();
        let (name, version) = match version_at {
            Some(idx) => (&identity[..idx], Some(&identity[idx + 1..])),
            None => (identity, None),
        };

        if name.is_empty() || name == "@" {
            return Err(CacheError::invalid_specifier(text, "missing package name"));
        }
        let version = version
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok(Self {
            raw: raw.to_string(),
            name: name.to_string(),
            version,
            path: path.filter(|p| !p.is_empty()),
        })
    }

    /// The specifier text exactly as given (trimmed).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Package name without version or path; the unsupported registry is keyed by this.
    pub fn base_name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn parsed_version(&self) -> Option<Version> {
        self.version.as_deref().map(Version::parse)
    }

    /// Local filesystem override, if the specifier carried `=path`.
    pub fn local_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// `name@version`, the Doc Cache key.
    ///
    /// Fails without an explicit version, and for names whose segments would
    /// escape the cache directory.
    pub fn doc_key(&self) -> Result<String, CacheError> {
        let Some(version) = self.version.as_deref() else {
            return Err(CacheError::invalid_specifier(
                &self.raw,
                "an explicit version is required",
            ));
        };
        let scope_free = self.name.strip_prefix('@').unwrap_or(&self.name);
        let bad_segment = scope_free
            .split(['/', '\\'])
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if bad_segment || version.contains(['/', '\\']) || version == ".." {
            return Err(CacheError::invalid_specifier(
                &self.raw,
                "name or version is not a valid path segment",
            ));
        }
        Ok(format!("{}@{}", self.name, version))
    }
}

impl fmt::Display for PackageSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PackageSpecifier {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
