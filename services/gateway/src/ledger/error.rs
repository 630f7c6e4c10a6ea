use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("usage storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("usage store unavailable: {0}")]
    Unavailable(String),
}
