use thiserror::Error;

#[derive(Error, Debug)]
pub enum DijeriaError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Object storage not configured")]
    ObjectStoreNotConfigured,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Returns true for errors caused by a lost optimistic transaction race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

/// Failures of the order number allocator.
#[derive(Error, Debug)]
pub enum SequenceError {
    /// Another allocation committed first against the value we read.
    #[error("Allocation conflict: {0}")]
    AllocationConflict(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store rejected the operation in a way another attempt cannot fix.
    #[error("Store fault: {0}")]
    StoreFault(String),

    #[error("Allocation failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: String },

    #[error("Corrupt counter record: {0}")]
    CorruptRecord(String),

    #[error("Sequence overflow")]
    Overflow,
}

impl SequenceError {
    /// Transient errors worth another read-increment-commit attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SequenceError::AllocationConflict(_) | SequenceError::StoreUnavailable(_)
        )
    }
}
