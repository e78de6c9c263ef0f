//! Persistence error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Turn log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid data at line {line}: {message}")]
    InvalidData { line: usize, message: String },
}

impl From<PersistenceError> for parley_core::Error {
    fn from(err: PersistenceError) -> Self {
        parley_core::Error::Persistence(err.to_string())
    }
}
