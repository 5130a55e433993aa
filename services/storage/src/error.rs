use thiserror::Error;

/// Errors surfaced by the blob and metadata stores.
///
/// `NotFound` is its own variant so callers can map a missing object to
/// a generic not-found outcome while every other I/O failure stays a
/// server-side error.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("blob store error: {0}")]
    Blob(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StorageError {
    /// Whether the error means the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
