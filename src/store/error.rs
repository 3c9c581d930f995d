use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The supplied data does not satisfy the store's invariants.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("project not found: {0}")]
    NotFound(String),
    /// The caller's view of the project is stale.
    #[error("version conflict on project {id}: expected {expected}, found {actual}")]
    VersionConflict { id: String, expected: u32, actual: u32 },
    /// The transaction was aborted; nothing it wrote is visible.
    #[error("transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Transaction(_) | StoreError::VersionConflict { .. }
        )
    }
}
