//! Metadata Cache: content-addressed connector metadata.
//!
//! Entries are keyed by [`MetadataKey`], a digest of the configuration and
//! adaptor specifier. Two concurrent generations for one key produce the same
//! bytes, so writes are plain atomic replacements with no placeholder.

use crate::cache_dir::{remove_tree, CacheDir};
use crate::error::{BoxError, CacheError, Result};
use crate::key::MetadataKey;
use crate::specifier::PackageSpecifier;
use crate::unsupported::UnsupportedRegistry;
use crate::util::{atomic_write, read_optional, LOG_TARGET};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Failure modes of the external introspection call.
#[derive(Debug, thiserror::Error)]
pub enum MetadataGenerateError {
    /// The adaptor has no metadata support at this version.
    #[error("adaptor does not support metadata generation")]
    Unsupported,
    #[error(transparent)]
    Failed(BoxError),
}

/// Derives connector metadata by running adaptor introspection against a configuration.
pub trait MetadataGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        config: &'a Value,
        adaptor: &'a PackageSpecifier,
    ) -> BoxFuture<'a, std::result::Result<Value, MetadataGenerateError>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip both the unsupported-version check and the cache lookup.
    pub force: bool,
}

/// Cached-supported entries vs. registered-unsupported adaptors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub cached_supported: usize,
    pub unsupported: usize,
}

#[derive(Clone, Debug)]
pub struct MetadataCache {
    root: PathBuf,
    registry: UnsupportedRegistry,
}

impl MetadataCache {
    pub fn new(cache_dir: &CacheDir) -> Self {
        Self {
            root: cache_dir.meta_dir(),
            registry: UnsupportedRegistry::new(cache_dir),
        }
    }

    pub fn registry(&self) -> &UnsupportedRegistry {
        &self.registry
    }

    pub fn generate_key(&self, config: &Value, adaptor: &str) -> MetadataKey {
        MetadataKey::generate(config, adaptor)
    }

    pub fn entry_path(&self, key: &MetadataKey) -> PathBuf {
        self.root.join(format!("{}.json", key.as_str()))
    }

    /// The cached entry for `key`. Missing and unparsable files are both misses.
    pub fn get(&self, key: &MetadataKey) -> Result<Option<Value>> {
        let path = self.entry_path(key);
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    path = %path.display(),
                    error = %err,
                    "treating unparsable metadata entry as a miss"
                );
                Ok(None)
            }
        }
    }

    pub fn set(&self, key: &MetadataKey, entry: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(entry)?;
        atomic_write(&self.entry_path(key), &bytes)
    }

    /// Returns metadata for `(config, adaptor)`, generating and caching it on a miss.
    ///
    /// Versions presumed unsupported fail fast with [`CacheError::Unsupported`]
    /// without invoking `generator`; a generator reporting lack of support is
    /// recorded in the registry. `force` bypasses both the registry and the cache.
    pub async fn fetch<G>(
        &self,
        config: &Value,
        adaptor: &str,
        generator: &G,
        options: FetchOptions,
    ) -> Result<Value>
    where
        G: MetadataGenerator + ?Sized,
    {
        let spec = PackageSpecifier::parse(adaptor)?;
        let key = self.generate_key(config, spec.raw());

        if !options.force {
            if self.registry.is_unsupported(spec.raw())? {
                tracing::debug!(
                    target: LOG_TARGET,
                    adaptor = %spec,
                    "skipping metadata generation for unsupported adaptor version"
                );
                return Err(unsupported(&spec));
            }
            if let Some(cached) = self.get(&key)? {
                tracing::debug!(target: LOG_TARGET, key = %key, "metadata cache hit");
                return Ok(cached);
            }
        }

        match generator.generate(config, &spec).await {
            Ok(metadata) => {
                self.set(&key, &metadata)?;
                Ok(metadata)
            }
            Err(MetadataGenerateError::Unsupported) => {
                self.registry.mark_unsupported(spec.raw())?;
                Err(unsupported(&spec))
            }
            Err(MetadataGenerateError::Failed(source)) => Err(CacheError::GenerationFailed {
                specifier: spec.to_string(),
                source,
            }),
        }
    }

    pub fn summary(&self) -> Result<CacheSummary> {
        Ok(CacheSummary {
            cached_supported: count_entries(&self.root, self.registry.path())?,
            unsupported: self.registry.len()?,
        })
    }

    /// Deletes every metadata entry and the unsupported-version registry.
    pub fn clear(&self) -> Result<()> {
        remove_tree(&self.root)
    }
}

fn unsupported(spec: &PackageSpecifier) -> CacheError {
    CacheError::Unsupported {
        adaptor: spec.base_name().to_string(),
        version: spec.version().unwrap_or("unknown").to_string(),
    }
}

fn count_entries(dir: &Path, registry_path: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let mut count = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path == registry_path || !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_dir::CacheConfig;
    use serde_json::json;

    fn cache() -> (tempfile::TempDir, MetadataCache) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = CacheDir::new(CacheConfig::with_root(tmp.path())).unwrap();
        (tmp, MetadataCache::new(&dir))
    }

    #[test]
    fn get_returns_none_for_missing_and_unparsable_entries() {
        let (_tmp, cache) = cache();
        let key = cache.generate_key(&json!({"a": 1}), "http@1.0.0");
        assert_eq!(cache.get(&key).unwrap(), None);

        std::fs::write(cache.entry_path(&key), b"{ truncated").unwrap();
        assert_eq!(cache.get(&key).unwrap(), None);
    }

    #[test]
    fn set_then_get_round_trips_through_disk() {
        let (_tmp, cache) = cache();
        let key = cache.generate_key(&json!({"a": 1}), "http@1.0.0");
        let entry = json!({"name": "http", "children": [{"name": "users"}]});

        cache.set(&key, &entry).unwrap();
        assert_eq!(cache.get(&key).unwrap(), Some(entry));
        assert!(cache
            .entry_path(&key)
            .ends_with(format!("meta/{}.json", key.as_str())));
    }

    #[test]
    fn summary_counts_entries_but_not_the_registry() {
        let (_tmp, cache) = cache();
        for i in 0..3 {
            let key = cache.generate_key(&json!({"i": i}), "http@1.0.0");
            cache.set(&key, &json!({})).unwrap();
        }
        cache.registry().mark_unsupported("legacy@0.1.0").unwrap();

        assert_eq!(
            cache.summary().unwrap(),
            CacheSummary {
                cached_supported: 3,
                unsupported: 1
            }
        );

        cache.clear().unwrap();
        assert_eq!(cache.summary().unwrap(), CacheSummary::default());
    }
}
