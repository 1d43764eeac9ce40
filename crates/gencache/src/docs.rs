//! Doc Cache: at-most-one concurrent generation per package, coordinated
//! through placeholder files in a shared directory.
//!
//! An entry file holds either a placeholder (`{"loading": true, "timestamp": <ms>}`)
//! claiming that generation is in flight, or the generated document itself.
//! A caller that finds no file claims it with an exclusive create before
//! dispatching generation; a caller that finds a placeholder polls until it is
//! replaced, or deletes it once it is older than the placeholder TTL.

use crate::cache_dir::CacheDir;
use crate::error::{BoxError, CacheError, Result};
use crate::specifier::PackageSpecifier;
use crate::util::{
    atomic_write, now_millis, read_optional, remove_file_best_effort, write_new, CreateOutcome,
    LOG_TARGET,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Produces the documentation for a package. Treated as an opaque, possibly slow call.
pub trait DocGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        specifier: &'a PackageSpecifier,
    ) -> BoxFuture<'a, std::result::Result<Value, BoxError>>;
}

/// Polling and staleness parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DocCachePolicy {
    /// Delay between re-reads while another caller is generating.
    pub retry_interval: Duration,
    /// Number of re-reads before giving up with [`CacheError::Timeout`].
    pub retry_count: u32,
    /// Placeholders at least this old are considered abandoned.
    pub placeholder_ttl: Duration,
}

impl Default for DocCachePolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(500),
            retry_count: 20,
            placeholder_ttl: Duration::from_millis(60_000),
        }
    }
}

/// What a Doc Cache entry currently holds, as read from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    /// Generation claimed at `timestamp` (epoch millis).
    Placeholder { timestamp: u64 },
    Complete,
}

#[derive(Debug, Serialize, Deserialize)]
struct Placeholder {
    loading: bool,
    #[serde(default)]
    timestamp: u64,
}

impl Placeholder {
    fn now() -> Self {
        Self {
            loading: true,
            timestamp: now_millis(),
        }
    }
}

/// Counts of entries currently in the docs directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DocCacheStats {
    pub complete: usize,
    pub in_progress: usize,
}

#[derive(Clone, Debug)]
pub struct DocCache {
    root: PathBuf,
    policy: DocCachePolicy,
}

impl DocCache {
    pub fn new(cache_dir: &CacheDir) -> Self {
        Self::with_policy(cache_dir, DocCachePolicy::default())
    }

    pub fn with_policy(cache_dir: &CacheDir, policy: DocCachePolicy) -> Self {
        Self {
            root: cache_dir.docs_dir(),
            policy,
        }
    }

    pub fn policy(&self) -> &DocCachePolicy {
        &self.policy
    }

    /// Path of the entry for `specifier`. Scoped names become nested directories.
    pub fn entry_path(&self, specifier: &str) -> Result<PathBuf> {
        let key = PackageSpecifier::parse(specifier)?.doc_key()?;
        Ok(self.path_for_key(&key))
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        let mut file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        file_name.push(".json");
        path.set_file_name(file_name);
        path
    }

    pub fn state(&self, specifier: &str) -> Result<EntryState> {
        let path = self.entry_path(specifier)?;
        read_state(&path)
    }

    /// The cached document for `specifier`, or `None` if absent or still generating.
    pub fn load(&self, specifier: &str) -> Result<Option<Value>> {
        let path = self.entry_path(specifier)?;
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        let value = parse_entry(&path, &bytes)?;
        if is_placeholder(&value) {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Returns the path of the generated document for `specifier`, generating
    /// it with `generator` if no other caller has done so.
    ///
    /// Across all processes sharing the cache directory at most one call
    /// generates a given entry at a time; the others wait for it.
    pub async fn ensure<G>(&self, specifier: &str, generator: &G) -> Result<PathBuf>
    where
        G: DocGenerator + ?Sized,
    {
        let parsed = PackageSpecifier::parse(specifier)?;
        let key = parsed.doc_key()?;
        let path = self.path_for_key(&key);

        // Each pass either returns or observed the entry vanish (abandoned
        // placeholder removed, or another generator failed and rolled back).
        const MAX_PASSES: usize = 4;
        for _ in 0..MAX_PASSES {
            match read_state(&path)? {
                EntryState::Complete => return Ok(path),
                EntryState::Absent => {
                    let placeholder = serde_json::to_vec(&Placeholder::now())?;
                    match write_new(&path, &placeholder)? {
                        CreateOutcome::Created => {
                            return self.generate(&parsed, &path, generator).await;
                        }
                        CreateOutcome::AlreadyExists => continue,
                    }
                }
                EntryState::Placeholder { timestamp } => {
                    let age = now_millis().saturating_sub(timestamp);
                    if age >= self.policy.placeholder_ttl.as_millis() as u64 {
                        tracing::warn!(
                            target: LOG_TARGET,
                            path = %path.display(),
                            age_ms = age,
                            "removing abandoned docs placeholder"
                        );
                        remove_file_best_effort(&path, "docs.ensure.stale_placeholder");
                        continue;
                    }
                    match self.wait_for_completion(&key, &path).await? {
                        EntryState::Complete => return Ok(path),
                        _ => continue,
                    }
                }
            }
        }

        Err(self.timeout(&path))
    }

    async fn generate<G>(
        &self,
        specifier: &PackageSpecifier,
        path: &Path,
        generator: &G,
    ) -> Result<PathBuf>
    where
        G: DocGenerator + ?Sized,
    {
        let guard = PlaceholderGuard::new(path);
        tracing::debug!(target: LOG_TARGET, specifier = %specifier, "generating docs");

        let document = generator
            .generate(specifier)
            .await
            .map_err(|source| CacheError::GenerationFailed {
                specifier: specifier.to_string(),
                source,
            })?;
        let bytes = serde_json::to_vec(&document)?;
        atomic_write(path, &bytes)?;

        guard.disarm();
        Ok(path.to_path_buf())
    }

    /// Re-reads the entry on a fixed interval until it stops being a placeholder.
    ///
    /// Returns the first non-placeholder state observed. The placeholder is
    /// never removed here: it belongs to whichever process is generating.
    async fn wait_for_completion(&self, key: &str, path: &Path) -> Result<EntryState> {
        for attempt in 1..=self.policy.retry_count {
            tokio::time::sleep(self.policy.retry_interval).await;
            match read_state(path)? {
                EntryState::Placeholder { .. } => {
                    tracing::info!(
                        target: LOG_TARGET,
                        key,
                        attempt,
                        max_attempts = self.policy.retry_count,
                        "waiting for docs to be generated"
                    );
                }
                state => return Ok(state),
            }
        }
        Err(self.timeout(path))
    }

    fn timeout(&self, path: &Path) -> CacheError {
        CacheError::Timeout {
            path: path.to_path_buf(),
            waited: self.policy.retry_interval * self.policy.retry_count,
        }
    }

    /// Counts complete and in-progress entries. Unreadable files are skipped.
    pub fn stats(&self) -> Result<DocCacheStats> {
        let mut stats = DocCacheStats::default();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some("json")
            {
                continue;
            }
            match read_state(path) {
                Ok(EntryState::Complete) => stats.complete += 1,
                Ok(EntryState::Placeholder { .. }) => stats.in_progress += 1,
                Ok(EntryState::Absent) => {}
                Err(err) => {
                    tracing::debug!(
                        target: LOG_TARGET,
                        path = %path.display(),
                        error = %err,
                        "skipping unreadable docs entry"
                    );
                }
            }
        }
        Ok(stats)
    }
}

fn read_state(path: &Path) -> Result<EntryState> {
    let Some(bytes) = read_optional(path)? else {
        return Ok(EntryState::Absent);
    };
    let value = parse_entry(path, &bytes)?;
    if !is_placeholder(&value) {
        return Ok(EntryState::Complete);
    }
    // A `loading` entry without a usable timestamp is treated as infinitely old.
    let timestamp = serde_json::from_value::<Placeholder>(value)
        .map(|p| p.timestamp)
        .unwrap_or(0);
    Ok(EntryState::Placeholder { timestamp })
}

fn parse_entry(path: &Path, bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|err| CacheError::CorruptCache {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn is_placeholder(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| obj.contains_key("loading"))
}

/// Removes the claimed placeholder unless generation completed, so a failed
/// or dropped generation restores the entry to absent.
struct PlaceholderGuard<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> PlaceholderGuard<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PlaceholderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            remove_file_best_effort(self.path, "docs.generate.rollback");
        }
    }
}
