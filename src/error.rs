//! Error types for install operations

use thiserror::Error;

/// Errors produced by adapters and the install pipeline
///
/// Only [`InstallError::NotFound`], [`InstallError::NoFilesDownloaded`] and
/// [`InstallError::AdapterNotFound`] are meant to reach an end user as-is.
/// Everything else is either recovered where it happens or reported as an
/// internal failure.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("invalid model spec '{0}': expected namespace/name[@version]")]
    InvalidSpec(String),

    #[error("invalid model name '{name}' for {adapter}: expected {expected}")]
    InvalidModelName {
        adapter: String,
        name: String,
        expected: String,
    },

    #[error("model not found: {0}")]
    NotFound(String),

    #[error("no adapter found for {namespace}/{name}")]
    AdapterNotFound { namespace: String, name: String },

    #[error("no files downloaded for {0}")]
    NoFilesDownloaded(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("package error: {0}")]
    Package(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
}

impl InstallError {
    /// Whether this error should be shown to the user verbatim
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::NoFilesDownloaded(_) | Self::AdapterNotFound { .. }
        )
    }

    /// Whether the error is an upstream 404
    pub fn is_not_found_status(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 404, .. })
    }
}

pub type InstallResult<T> = Result<T, InstallError>;
