//! Generation caches for expensive, deterministic artifacts shared by many
//! independent processes through one cache directory.
//!
//! - [`DocCache`]: package documentation keyed by `name@version`, with
//!   cross-process mutual exclusion via placeholder files
//! - [`MetadataCache`]: connector metadata keyed by a digest of
//!   `(configuration, adaptor specifier)`
//! - [`UnsupportedRegistry`]: the highest adaptor version per name known to
//!   lack metadata support, so older releases fail fast
//!
//! There is no lock service: every coordination step is a whole-file write or
//! an exclusive create in the shared directory (see [`CacheDir`] for layout).

mod cache_dir;
mod docs;
mod error;
mod key;
mod lock;
mod metadata;
mod specifier;
mod unsupported;
mod util;

pub use cache_dir::{CacheConfig, CacheDir, CACHE_DIR_ENV};
pub use docs::{DocCache, DocCachePolicy, DocCacheStats, DocGenerator, EntryState};
pub use error::{BoxError, CacheError, Result};
pub use key::{canonicalize, MetadataKey};
pub use lock::FileLock;
pub use metadata::{
    CacheSummary, FetchOptions, MetadataCache, MetadataGenerateError, MetadataGenerator,
};
pub use specifier::{PackageSpecifier, Version};
pub use unsupported::{Registry, UnsupportedEntry, UnsupportedRegistry};
pub use util::{atomic_write, now_millis};
