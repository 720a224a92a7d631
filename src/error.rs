use std::{path::PathBuf, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("record encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("index is not initialized")]
    NotInitialized,

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("corrupt index data: {0}")]
    Corrupt(String),
}

impl Error {
    /// Returns `true` for failures raised by the underlying store.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Redb(_)
                | Error::RedbDatabase(_)
                | Error::RedbStorage(_)
                | Error::RedbTransaction(_)
                | Error::RedbTable(_)
                | Error::RedbCommit(_)
                | Error::Json(_)
                | Error::Corrupt(_)
        )
    }
}

/// Failures produced while turning chunk text into vectors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding failed: {0}")]
    Failed(String),

    #[error("embedding chunk {chunk_index} timed out after {timeout:?}")]
    Timeout { chunk_index: usize, timeout: Duration },

    #[error("embedding the query timed out after {timeout:?}")]
    QueryTimeout { timeout: Duration },

    #[error("embedding has {actual} components, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding has zero norm and cannot be normalized")]
    NotNormalizable,
}

/// Failures produced while extracting text from a source file.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_classified() {
        assert!(Error::Corrupt("bad vector".into()).is_storage());
        assert!(!Error::NotInitialized.is_storage());
        assert!(!Error::from(EmbeddingError::NotNormalizable).is_storage());
    }

    #[test]
    fn timeout_message_names_chunk() {
        let err = EmbeddingError::Timeout {
            chunk_index: 3,
            timeout: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "embedding chunk 3 timed out after 2s");
    }
}
