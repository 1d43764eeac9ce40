use crate::error::CacheError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const LOG_TARGET: &str = "gencache";

/// Milliseconds since the unix epoch, as stored in placeholders and registry entries.
pub fn now_millis() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as u64,
        Err(err) => {
            static REPORTED: OnceLock<()> = OnceLock::new();
            if REPORTED.set(()).is_ok() {
                tracing::debug!(
                    target: LOG_TARGET,
                    error = %err,
                    "system time is before unix epoch; using 0 for now_millis"
                );
            }
            0
        }
    }
}

/// Reads a cache file, mapping "not found" to `Ok(None)`.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn remove_file_best_effort(path: &Path, reason: &'static str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::debug!(
                target: LOG_TARGET,
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove cache file"
            );
            false
        }
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Replaces `path` with `bytes` so other processes only ever observe the old
/// or the new contents, never a partial write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let parent = parent_dir(path)?;
    let tmp_path = write_tmp_file(path, parent, bytes)?;

    if let Err(err) = rename_over(&tmp_path, path) {
        remove_file_best_effort(&tmp_path, "atomic_write.rename_failed");
        return Err(err.into());
    }
    sync_dir_best_effort(parent);
    Ok(())
}

/// Outcome of [`write_new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Creates `path` with `bytes` only if it does not exist yet.
///
/// The file is fully written under a temporary name and then hard-linked into
/// place, so the create is exclusive and readers never observe an empty or
/// half-written file. Filesystems without hard links fall back to a plain
/// rename, which keeps the whole-file guarantee but loses exclusivity.
pub(crate) fn write_new(path: &Path, bytes: &[u8]) -> Result<CreateOutcome, CacheError> {
    let parent = parent_dir(path)?;
    let tmp_path = write_tmp_file(path, parent, bytes)?;

    let outcome = match fs::hard_link(&tmp_path, path) {
        Ok(()) => Ok(CreateOutcome::Created),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
        Err(err) if hard_links_unsupported(&err) => {
            tracing::debug!(
                target: LOG_TARGET,
                path = %path.display(),
                error = %err,
                "hard links unsupported; claiming cache entry with rename"
            );
            if path.exists() {
                Ok(CreateOutcome::AlreadyExists)
            } else {
                rename_over(&tmp_path, path)
                    .map(|()| CreateOutcome::Created)
                    .map_err(CacheError::from)
            }
        }
        Err(err) => Err(err.into()),
    };

    remove_file_best_effort(&tmp_path, "write_new.cleanup_tmp");
    if matches!(outcome, Ok(CreateOutcome::Created)) {
        sync_dir_best_effort(parent);
    }
    outcome
}

fn hard_links_unsupported(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
    )
}

fn parent_dir(path: &Path) -> Result<&Path, CacheError> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent").into());
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    fs::create_dir_all(parent)?;
    Ok(parent)
}

fn write_tmp_file(dest: &Path, parent: &Path, bytes: &[u8]) -> Result<PathBuf, CacheError> {
    let (tmp_path, mut file) = open_unique_tmp_file(dest, parent)?;
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);
    if let Err(err) = written {
        remove_file_best_effort(&tmp_path, "write_tmp_file.write_failed");
        return Err(err.into());
    }
    Ok(tmp_path)
}

fn rename_over(from: &Path, to: &Path) -> io::Result<()> {
    const MAX_RENAME_ATTEMPTS: usize = 64;

    let mut attempts = 0usize;
    loop {
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            // `rename` doesn't overwrite on Windows; concurrent writers can race the removal.
            Err(err)
                if cfg!(windows)
                    && (err.kind() == io::ErrorKind::AlreadyExists || to.exists()) =>
            {
                match fs::remove_file(to) {
                    Ok(()) => {}
                    Err(remove_err) if remove_err.kind() == io::ErrorKind::NotFound => {}
                    Err(remove_err) => return Err(remove_err),
                }
                attempts += 1;
                if attempts >= MAX_RENAME_ATTEMPTS {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn sync_dir_best_effort(dir: &Path) {
    #[cfg(unix)]
    {
        static SYNC_DIR_ERROR_LOGGED: OnceLock<()> = OnceLock::new();
        match fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                if SYNC_DIR_ERROR_LOGGED.set(()).is_ok() {
                    tracing::debug!(
                        target: LOG_TARGET,
                        dir = %dir.display(),
                        error = %err,
                        "failed to sync directory (best effort)"
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = dir;
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}
