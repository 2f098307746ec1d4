/// Errors from repository storage operations.
///
/// Absence is not an error: reads of missing records return `Ok(None)` and
/// existence checks return `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
