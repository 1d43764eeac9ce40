use crate::error::CacheError;
use fs2::FileExt as _;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Exclusive advisory lock on a sidecar file, shared by every process using
/// the same cache directory. Released on drop.
///
/// Guards read-modify-write cycles on shared single-file stores such as the
/// unsupported-version registry.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
    // `fs2` locks are per-process on Unix; the mutex excludes other threads of this process.
    _guard: MutexGuard<'static, ()>,
}

impl FileLock {
    /// Blocks until the lock on `path` is held, creating the lock file if needed.
    pub fn acquire(path: &Path) -> Result<Self, CacheError> {
        let guard = in_process_mutex(path)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn in_process_mutex(path: &Path) -> &'static Mutex<()> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, &'static Mutex<()>>>> = OnceLock::new();

    let mut map = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mutex = *map
        .entry(path.to_path_buf())
        .or_insert_with(|| &*Box::leak(Box::new(Mutex::new(()))));
    mutex
}
