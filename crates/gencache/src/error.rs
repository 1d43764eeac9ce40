use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Error type returned by external generators (doc extraction, introspection).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the generation caches.
///
/// None of these are fatal to the host process; callers decide whether to
/// abort the command, fall back, or skip the feature.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Caller error: the specifier is malformed or lacks a required version.
    /// Raised before any filesystem side effect.
    #[error("invalid specifier `{specifier}`: {reason}")]
    InvalidSpecifier { specifier: String, reason: String },

    /// The external generation call failed. Any placeholder has been removed.
    #[error("generation failed for {specifier}")]
    GenerationFailed {
        specifier: String,
        #[source]
        source: BoxError,
    },

    /// Waited the full retry budget without observing a completed entry.
    ///
    /// The placeholder is left in place; whichever process owns it may still
    /// complete the entry, so callers can retry later.
    #[error("timed out after {waited:?} waiting for {path} to be generated")]
    Timeout { path: PathBuf, waited: Duration },

    /// An existing cache file could not be parsed as JSON.
    #[error("corrupt cache entry at {path}: {message}")]
    CorruptCache { path: PathBuf, message: String },

    /// The adaptor version is known (or presumed) not to support introspection.
    #[error("adaptor {adaptor}@{version} does not support metadata generation")]
    Unsupported { adaptor: String, version: String },

    #[error("failed to determine home directory for default cache path")]
    MissingHomeDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {message}")]
    Json { message: String },
}

impl CacheError {
    pub(crate) fn invalid_specifier(specifier: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSpecifier {
            specifier: specifier.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`CacheError::Timeout`], which callers typically retry later.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn generation_failed_exposes_generator_error_as_source() {
        let err = CacheError::GenerationFailed {
            specifier: "pkg@1.0.0".to_string(),
            source: "adaptor exploded".into(),
        };
        assert_eq!(err.to_string(), "generation failed for pkg@1.0.0");
        let source = err.source().expect("source should be set");
        assert_eq!(source.to_string(), "adaptor exploded");
    }

    #[test]
    fn timeout_is_distinct_from_generation_failure() {
        let timeout = CacheError::Timeout {
            path: PathBuf::from("/tmp/docs/pkg@1.0.0.json"),
            waited: Duration::from_millis(500),
        };
        assert!(timeout.is_timeout());
        assert!(timeout.to_string().contains("pkg@1.0.0.json"));

        let failed = CacheError::GenerationFailed {
            specifier: "pkg@1.0.0".to_string(),
            source: "boom".into(),
        };
        assert!(!failed.is_timeout());
    }
}
