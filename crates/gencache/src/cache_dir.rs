use crate::error::CacheError;
use crate::util::LOG_TARGET;
use std::path::{Path, PathBuf};

/// Environment variable overriding the default cache root.
pub const CACHE_DIR_ENV: &str = "GENCACHE_DIR";

/// Configuration for selecting the on-disk cache root.
#[derive(Clone, Debug, Default)]
pub struct CacheConfig {
    /// Use this directory instead of `~/.gencache`.
    pub cache_root_override: Option<PathBuf>,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            cache_root_override: std::env::var_os(CACHE_DIR_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root_override: Some(root.into()),
        }
    }
}

/// The shared cache directory. The only resource shared between processes.
///
/// Layout:
/// - `docs/<name>@<version>.json`: Doc Cache entries (scoped names nest, e.g.
///   `docs/@org/pkg@1.0.0.json`)
/// - `meta/<key>.json`: Metadata Cache entries
/// - `meta/unsupported.json`: the unsupported-version registry
#[derive(Clone, Debug)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let base = match config.cache_root_override {
            Some(root) => root,
            None => default_cache_root()?,
        };

        std::fs::create_dir_all(base.join("docs"))?;
        std::fs::create_dir_all(base.join("meta"))?;
        let root = std::fs::canonicalize(&base)?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.root.join("docs")
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    pub fn unsupported_path(&self) -> PathBuf {
        self.meta_dir().join("unsupported.json")
    }

    /// Deletes the entire cache tree. There is no partial clearing.
    pub fn clear(&self) -> Result<(), CacheError> {
        remove_tree(&self.root)
    }
}

pub(crate) fn remove_tree(path: &Path) -> Result<(), CacheError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::debug!(target: LOG_TARGET, path = %path.display(), "removed cache tree");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn default_cache_root() -> Result<PathBuf, CacheError> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .ok_or(CacheError::MissingHomeDir)?;

    Ok(home.join(".gencache"))
}
