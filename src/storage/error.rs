use thiserror::Error;

/// Errors surfaced by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrent commit invalidated something this transaction read or wrote.
    #[error("write conflict on collection '{collection}'")]
    WriteConflict { collection: String },
    #[error("duplicate key for index '{index}' on collection '{collection}'")]
    DuplicateKey { collection: String, index: String },
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),
    #[error("transaction deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32 },
    #[error("document in '{collection}' is missing a string _id")]
    MissingId { collection: String },
    #[error("document codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("snapshot: {0}")]
    Snapshot(#[from] bincode::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Transient errors are retried by the transaction runner.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::WriteConflict { .. })
    }

    pub fn is_duplicate_key(&self, index_name: &str) -> bool {
        matches!(self, StoreError::DuplicateKey { index, .. } if index == index_name)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
