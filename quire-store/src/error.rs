use quire_model::{EntryId, MetaError, Watermark};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store was closed, or never opened.
    #[error("storage unavailable")]
    Unavailable,
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Meta(#[from] MetaError),
    #[error("prev entry {0} not found")]
    UnknownPrev(EntryId),
    #[error("lastSynced would regress from {current} to {proposed}")]
    WatermarkRegression {
        current: Watermark,
        proposed: Watermark,
    },
    #[error("lastSynced {proposed} is ahead of lastAdded")]
    WatermarkAhead { proposed: Watermark },
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Faults of the underlying engine, as opposed to rejected requests.
    pub fn is_engine_fault(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_)
                | StoreError::Table(_)
                | StoreError::Transaction(_)
                | StoreError::Commit(_)
                | StoreError::Storage(_)
                | StoreError::Io(_)
        )
    }
}
