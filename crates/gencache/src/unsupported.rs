//! Registry of adaptor versions confirmed not to support metadata generation.
//!
//! Only the highest unsupported version per adaptor is kept. Requests for the
//! same or an older minor release are presumed to share the limitation and
//! fail fast; a newer minor or major release is worth retrying.

use crate::cache_dir::CacheDir;
use crate::error::{CacheError, Result};
use crate::lock::FileLock;
use crate::specifier::{PackageSpecifier, Version};
use crate::util::{atomic_write, now_millis, read_optional, LOG_TARGET};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsupportedEntry {
    pub last_checked_version: Version,
    pub major_minor: String,
    pub timestamp: u64,
}

/// On-disk form: adaptor base name → entry.
pub type Registry = BTreeMap<String, UnsupportedEntry>;

#[derive(Clone, Debug)]
pub struct UnsupportedRegistry {
    path: PathBuf,
    lock_path: PathBuf,
}

impl UnsupportedRegistry {
    pub fn new(cache_dir: &CacheDir) -> Self {
        Self::at(cache_dir.unsupported_path())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `adaptor` is presumed unsupported.
    ///
    /// `false` when the specifier has no version or nothing is recorded for
    /// the adaptor: without evidence, callers should attempt generation.
    pub fn is_unsupported(&self, adaptor: &str) -> Result<bool> {
        let spec = PackageSpecifier::parse(adaptor)?;
        let Some(version) = spec.parsed_version() else {
            return Ok(false);
        };
        let registry = self.load()?;
        Ok(registry
            .get(spec.base_name())
            .is_some_and(|entry| version.within_release_of(&entry.last_checked_version)))
    }

    /// Records that `adaptor` does not support metadata generation.
    ///
    /// A no-op for versionless specifiers and for versions not strictly
    /// higher than the one already recorded. Returns whether the registry changed.
    pub fn mark_unsupported(&self, adaptor: &str) -> Result<bool> {
        let spec = PackageSpecifier::parse(adaptor)?;
        let Some(version) = spec.parsed_version() else {
            return Ok(false);
        };

        let _lock = FileLock::acquire(&self.lock_path)?;
        let mut registry = self.load()?;
        if registry
            .get(spec.base_name())
            .is_some_and(|entry| version <= entry.last_checked_version)
        {
            return Ok(false);
        }

        registry.insert(
            spec.base_name().to_string(),
            UnsupportedEntry {
                last_checked_version: version,
                major_minor: version.major_minor(),
                timestamp: now_millis(),
            },
        );
        let bytes = serde_json::to_vec_pretty(&registry)?;
        atomic_write(&self.path, &bytes)?;
        tracing::debug!(
            target: LOG_TARGET,
            adaptor = spec.base_name(),
            version = %version,
            "recorded unsupported adaptor version"
        );
        Ok(true)
    }

    pub fn entry(&self, base_name: &str) -> Result<Option<UnsupportedEntry>> {
        Ok(self.load()?.remove(base_name))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads the registry. A missing file is an empty registry; so is an
    /// unreadable one, since the registry is only a hint.
    pub fn load(&self) -> Result<Registry> {
        let Some(bytes) = read_optional(&self.path)? else {
            return Ok(Registry::new());
        };
        match serde_json::from_slice(&bytes) {
            Ok(registry) => Ok(registry),
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    path = %self.path.display(),
                    error = %CacheError::from(err),
                    "ignoring unreadable unsupported-version registry"
                );
                Ok(Registry::new())
            }
        }
    }
}
