//! Error types for sync-store.

use std::path::PathBuf;
use sync_types::TypesError;

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record could not be encoded or decoded.
    #[error("task record codec error: {0}")]
    Codec(#[from] TypesError),

    /// A stored row disagrees with the record it holds.
    #[error("corrupt task row {task_id}: {reason}")]
    Corrupt {
        /// Row key.
        task_id: String,
        /// What is wrong.
        reason: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
    }

    #[test]
    fn corrupt_error_names_the_row() {
        let err = StoreError::Corrupt {
            task_id: "abc".into(),
            reason: "kind mismatch".into(),
        };
        assert_eq!(err.to_string(), "corrupt task row abc: kind mismatch");
    }
}
