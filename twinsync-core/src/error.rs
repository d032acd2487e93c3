use thiserror::Error;

/// Error kinds a [`crate::provider::Provider`] may raise, named abstractly
/// per the contract rather than after any one concrete backend's SDK
/// exceptions.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("invalid credentials: {0}")]
    InvalidToken(String),

    #[error("event cursor no longer recognized: {0}")]
    InvalidCursor(String),

    #[error("path violates provider naming rules: {0}")]
    NamespaceRule(String),

    #[error("programming error: {0}")]
    Programming(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    pub fn is_exists(&self) -> bool {
        matches!(self, ProviderError::Exists(_))
    }
}

/// Errors raised by the persistence ("Storage") interface.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unknown persistence id: {0}")]
    UnknownId(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Top-level engine error: everything [`crate::state::SyncState`] and
/// [`crate::manager::SyncManager`] can fail with.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
