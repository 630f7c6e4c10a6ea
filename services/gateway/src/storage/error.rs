use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("connection lock poisoned")]
    LockPoisoned,
    #[error("counter value out of range for {0}")]
    CounterOutOfRange(String),
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
}
