use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walkdir error: {0}")]
    Walkdir(#[from] walkdir::Error),

    #[error("not a directory: {path:?}")]
    NotADirectory { path: PathBuf },

    #[error("no eligible files in directory: {path:?}")]
    EmptyDirectory { path: PathBuf },

    #[error("authentication required: {message}")]
    AuthRequired { message: String },

    #[error("remote catalog unavailable: {message}")]
    RemoteUnavailable { message: String },

    #[error("upload failed: {message}")]
    UploadFailed { message: String, retryable: bool },

    /// The set name is already taken remotely; `create_set` must not be
    /// retried, the existing set is looked up instead.
    #[error("set already exists: {name}")]
    SetExists { name: String },

    #[error("asset already present in set: {display_name}")]
    AlreadyPresent { display_name: String },

    #[error("unsupported path (must be UTF-8): {path:?}")]
    NonUtf8Path { path: PathBuf },

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn upload_transient(message: impl Into<String>) -> Self {
        Self::UploadFailed {
            message: message.into(),
            retryable: true,
        }
    }

    pub(crate) fn upload_permanent(message: impl Into<String>) -> Self {
        Self::UploadFailed {
            message: message.into(),
            retryable: false,
        }
    }

    /// Transient per-item failures that a worker may retry locally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UploadFailed {
                retryable: true,
                ..
            }
        )
    }

    /// Catalog-wide failures: the run stops dispatching new work.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired { .. } | Self::RemoteUnavailable { .. }
        )
    }
}
